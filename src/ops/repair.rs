//! On-demand read-repair
//!
//! Never invoked by the read path: `get` returns the first value it finds
//! and leaves divergent replicas alone until someone asks for a repair.

use serde::Serialize;

use crate::common::Result;
use crate::coordinator::Coordinator;

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub key: String,
    /// Closest-first value used as the source of truth, if any replica held one
    pub value: Option<String>,
    pub replicas_checked: usize,
    /// Replicas that were missing the key or held a different value
    pub replicas_repaired: Vec<String>,
    pub failed: Vec<String>,
}

/// Rewrite the closest-first value of `key` onto every live replica that disagrees.
pub async fn repair_key(coordinator: &Coordinator, key: &str) -> Result<RepairReport> {
    let replicas = coordinator
        .ring()
        .replica_set(key, coordinator.replication_factor());

    let mut report = RepairReport {
        key: key.to_string(),
        value: None,
        replicas_checked: replicas.len(),
        replicas_repaired: Vec::new(),
        failed: Vec::new(),
    };

    let mut observed = Vec::with_capacity(replicas.len());
    for unit in &replicas {
        match unit.get(key) {
            Ok(value) => observed.push(Some(value)),
            Err(e) => {
                tracing::warn!("Repair of '{}': cannot read node {}: {}", key, unit.id(), e);
                observed.push(None);
            }
        }
    }

    let Some(truth) = observed.iter().flatten().flatten().next().cloned() else {
        tracing::debug!("Repair of '{}': no replica holds the key", key);
        return Ok(report);
    };

    for (unit, seen) in replicas.iter().zip(&observed) {
        match seen {
            Some(Some(value)) if *value == truth => continue,
            // Unreadable replicas are not written either
            None => {
                report.failed.push(unit.id().to_string());
                continue;
            }
            _ => {}
        }

        match unit.put(key, &truth) {
            Ok(_) => report.replicas_repaired.push(unit.id().to_string()),
            Err(e) => {
                tracing::warn!("Repair of '{}' on node {} failed: {}", key, unit.id(), e);
                report.failed.push(unit.id().to_string());
            }
        }
    }

    if !report.replicas_repaired.is_empty() {
        tracing::info!(
            "Repaired key '{}' on {} replicas",
            key,
            report.replicas_repaired.len()
        );
    }
    report.value = Some(truth);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ClusterMetrics;
    use crate::coordinator::placement::ConsistentHashRing;
    use crate::node::StorageUnit;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator() -> Coordinator {
        let coord = Coordinator::with_parts(
            Arc::new(ConsistentHashRing::new(32)),
            Arc::new(ClusterMetrics::new()),
            3,
            Duration::from_secs(5),
        );
        for id in ["n1", "n2", "n3"] {
            coord
                .ring()
                .add_node(Arc::new(StorageUnit::new(id, "localhost", 7000)));
        }
        coord
    }

    #[tokio::test]
    async fn test_repair_fills_missing_and_divergent_replicas() {
        let coord = coordinator();
        let replicas = coord.ring().replica_set("k", 3);
        replicas[0].put("k", "good").unwrap();
        replicas[1].put("k", "stale").unwrap();

        let report = repair_key(&coord, "k").await.unwrap();
        assert_eq!(report.value.as_deref(), Some("good"));
        assert_eq!(report.replicas_checked, 3);
        assert_eq!(report.replicas_repaired.len(), 2);

        for unit in &replicas {
            assert_eq!(unit.get("k").unwrap(), Some("good".to_string()));
        }
    }

    #[tokio::test]
    async fn test_repair_absent_key() {
        let coord = coordinator();
        let report = repair_key(&coord, "missing").await.unwrap();
        assert!(report.value.is_none());
        assert!(report.replicas_repaired.is_empty());
    }

    #[tokio::test]
    async fn test_get_does_not_repair() {
        let coord = coordinator();
        let replicas = coord.ring().replica_set("k", 3);
        replicas[0].put("k", "v").unwrap();

        assert_eq!(coord.get("k").await, Some("v".to_string()));
        assert!(!replicas[1].contains_key("k"));
        assert!(!replicas[2].contains_key("k"));
    }
}

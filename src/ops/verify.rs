//! Verify cluster integrity

use serde::Serialize;
use std::collections::BTreeSet;

use crate::common::Result;
use crate::coordinator::Coordinator;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub ring_consistent: bool,
    pub ring_issues: Vec<String>,
    pub total_keys: usize,
    /// Held by every member of the replica set
    pub healthy: usize,
    /// Held by some but not all replicas
    pub under_replicated: usize,
    /// Replicas disagree on the value
    pub divergent: usize,
    /// Held only by units outside the replica set
    pub orphaned: usize,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.ring_consistent
            && self.under_replicated == 0
            && self.divergent == 0
            && self.orphaned == 0
    }
}

/// Check ring bookkeeping and per-key replica coverage
pub async fn verify_cluster(coordinator: &Coordinator) -> Result<VerifyReport> {
    tracing::info!("Starting cluster verification");

    let ring = coordinator.ring();
    let ring_issues = ring.inconsistencies();
    let units = ring.all_units();
    let keys: BTreeSet<String> = units.iter().flat_map(|unit| unit.keys()).collect();

    let mut report = VerifyReport {
        ring_consistent: ring_issues.is_empty(),
        ring_issues,
        total_keys: keys.len(),
        healthy: 0,
        under_replicated: 0,
        divergent: 0,
        orphaned: 0,
    };

    for (i, key) in keys.iter().enumerate() {
        if i > 0 && i % 256 == 0 {
            tokio::task::yield_now().await;
        }

        let replicas = ring.replica_set(key, coordinator.replication_factor());
        let values: Vec<String> = replicas
            .iter()
            .filter_map(|unit| unit.get(key).ok().flatten())
            .collect();

        if values.is_empty() {
            report.orphaned += 1;
        } else if values.iter().any(|v| *v != values[0]) {
            report.divergent += 1;
        } else if values.len() < replicas.len() {
            report.under_replicated += 1;
        } else {
            report.healthy += 1;
        }
    }

    tracing::info!(
        "Verification finished: {} keys, {} healthy, {} under-replicated, {} divergent, {} orphaned",
        report.total_keys,
        report.healthy,
        report.under_replicated,
        report.divergent,
        report.orphaned
    );
    Ok(report)
}

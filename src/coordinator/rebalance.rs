//! Data movement after membership changes
//!
//! Both passes are best-effort: they read live unit maps without snapshot
//! isolation, so a client write racing a migration can be moved, duplicated
//! or left on a stale holder. Per-unit failures are logged and counted.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::coordinator::placement::ConsistentHashRing;
use crate::node::StorageUnit;

/// Yield to the scheduler every this many keys
const YIELD_EVERY: usize = 256;

#[derive(Debug, Default, Clone, Serialize)]
pub struct MigrationReport {
    pub node_id: String,
    /// Distinct keys found on the other units
    pub scanned: usize,
    /// Keys taken from a holder that no longer belongs to the replica set
    pub moved: usize,
    /// Keys copied from a holder that is still a replica
    pub copied: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RedistributionReport {
    pub redistributed: usize,
    pub failed: usize,
}

/// Pull onto `new_unit` every key whose replica set now includes it.
///
/// For each such key, the value is taken from the first holder (in id order)
/// that is no longer part of the key's replica set, and deleted there. At
/// most one copy moves per key. When every holder is still a legitimate
/// replica the value is copied from the first of them instead.
pub async fn migrate_to_new_unit(
    ring: &ConsistentHashRing,
    new_unit: &Arc<StorageUnit>,
    replication_factor: usize,
) -> MigrationReport {
    let new_id = new_unit.id().to_string();
    let mut report = MigrationReport {
        node_id: new_id.clone(),
        ..Default::default()
    };

    let others: Vec<Arc<StorageUnit>> = ring
        .all_units()
        .into_iter()
        .filter(|unit| unit.id() != new_id)
        .collect();

    let keys: BTreeSet<String> = others.iter().flat_map(|unit| unit.keys()).collect();
    report.scanned = keys.len();

    for (i, key) in keys.iter().enumerate() {
        if i > 0 && i % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }

        let owners = ring.replica_set(key, replication_factor);
        if !owners.iter().any(|unit| unit.id() == new_id) {
            continue;
        }
        if new_unit.contains_key(key) {
            continue;
        }

        let is_owner = |unit: &StorageUnit| owners.iter().any(|owner| owner.id() == unit.id());
        let holders: Vec<&Arc<StorageUnit>> =
            others.iter().filter(|unit| unit.contains_key(key)).collect();

        let (source, stale) = match holders.iter().find(|unit| !is_owner(unit)) {
            Some(unit) => (*unit, true),
            None => match holders.first() {
                Some(unit) => (*unit, false),
                // Deleted since the scan
                None => continue,
            },
        };

        let value = match source.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Cannot read key '{}' from node {}: {}", key, source.id(), e);
                report.failed += 1;
                continue;
            }
        };

        if let Err(e) = new_unit.put(key, &value) {
            tracing::error!("Failed to move key '{}' to new node {}: {}", key, new_id, e);
            report.failed += 1;
            continue;
        }

        if stale {
            if let Err(e) = source.remove(key) {
                tracing::warn!(
                    "Moved key '{}' but could not delete it from node {}: {}",
                    key,
                    source.id(),
                    e
                );
            }
            tracing::debug!("Moved key '{}' from {} to {}", key, source.id(), new_id);
            report.moved += 1;
        } else {
            tracing::debug!("Copied key '{}' from {} to {}", key, source.id(), new_id);
            report.copied += 1;
        }
    }

    report
}

/// Re-insert the contents of a removed unit through the current replica sets.
///
/// No quorum: a key counts as redistributed when at least one replica accepted it.
pub async fn redistribute(
    ring: &ConsistentHashRing,
    data: HashMap<String, String>,
    replication_factor: usize,
) -> RedistributionReport {
    let mut report = RedistributionReport::default();

    for (i, (key, value)) in data.iter().enumerate() {
        if i > 0 && i % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }

        let targets = ring.replica_set(key, replication_factor);
        if targets.is_empty() {
            tracing::warn!("No active nodes for key '{}' during redistribution", key);
            report.failed += 1;
            continue;
        }

        let mut stored = false;
        for unit in &targets {
            match unit.put(key, value) {
                Ok(_) => stored = true,
                Err(e) => tracing::error!(
                    "Failed to store key '{}' on node {} during redistribution: {}",
                    key,
                    unit.id(),
                    e
                ),
            }
        }

        if stored {
            report.redistributed += 1;
        } else {
            report.failed += 1;
        }
    }

    report
}

//! Quorum coordinator
//!
//! Routes reads, writes and deletes to the replica set the ring computes for
//! a key, and moves data around when units join or leave.

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::common::{ClusterMetrics, CoordinatorConfig, Error, MetricsSink, Result};
use crate::coordinator::placement::ConsistentHashRing;
use crate::coordinator::rebalance::{migrate_to_new_unit, redistribute};
use crate::coordinator::tasks::{MigrationKind, RebalanceRegistry, TaskTracker};
use crate::node::StorageUnit;

/// Point-in-time view of the cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub total_units: usize,
    pub active_units: usize,
    pub is_rebalancing: bool,
    /// Stored entries across all units, replicas included
    pub total_keys: usize,
    pub unique_keys: usize,
    pub total_operations: u64,
    pub avg_read_latency_ms: f64,
    pub avg_write_latency_ms: f64,
    pub data_distribution: BTreeMap<String, usize>,
    pub timestamp: DateTime<Utc>,
}

pub struct Coordinator {
    ring: Arc<ConsistentHashRing>,
    metrics: Arc<ClusterMetrics>,
    replication_factor: usize,
    write_timeout: Duration,
    tasks: Arc<TaskTracker>,
    rebalancing: Arc<RebalanceRegistry>,
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self::with_parts(
            Arc::new(ConsistentHashRing::new(config.virtual_nodes)),
            Arc::new(ClusterMetrics::new()),
            config.replication_factor,
            config.write_timeout(),
        )
    }

    /// Build around an existing ring and metrics sink
    pub fn with_parts(
        ring: Arc<ConsistentHashRing>,
        metrics: Arc<ClusterMetrics>,
        replication_factor: usize,
        write_timeout: Duration,
    ) -> Self {
        Self {
            ring,
            metrics,
            replication_factor,
            write_timeout,
            tasks: Arc::new(TaskTracker::new()),
            rebalancing: Arc::new(RebalanceRegistry::new()),
        }
    }

    pub fn ring(&self) -> &Arc<ConsistentHashRing> {
        &self.ring
    }

    pub fn metrics(&self) -> &Arc<ClusterMetrics> {
        &self.metrics
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Store `value` under `key` on a majority of its replica set.
    ///
    /// Writes to the remaining replicas keep running after quorum is reached.
    /// A failed quorum leaves whatever writes did land in place.
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        let start = Instant::now();
        let targets = self.ring.replica_set(key, self.replication_factor);
        if targets.is_empty() {
            self.metrics.record_failed();
            return Err(Error::NoActiveUnits);
        }

        tracing::debug!(
            "Storing key '{}' on {} nodes: {:?}",
            key,
            targets.len(),
            targets.iter().map(|u| u.id()).collect::<Vec<_>>()
        );

        match self.write_quorum(key, value, targets).await {
            Ok(_) => {
                self.metrics.record_write(start.elapsed());
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failed();
                Err(e)
            }
        }
    }

    /// Fan a write out to `targets` and wait for a majority of them.
    ///
    /// Each outcome is awaited for at most the write timeout; a timeout gives
    /// up on one outstanding write and keeps waiting for the others. Returns
    /// the number of acknowledgements seen before returning.
    pub(crate) async fn write_quorum(
        &self,
        key: &str,
        value: &str,
        targets: Vec<Arc<StorageUnit>>,
    ) -> Result<usize> {
        let required = targets.len() / 2 + 1;
        let mut outcomes = FuturesUnordered::new();

        for unit in targets {
            let (tx, rx) = oneshot::channel();
            let metrics = self.metrics.clone();
            let key = key.to_string();
            let value = value.to_string();
            self.tasks.spawn(async move {
                let result = unit.put(&key, &value).map(|_| ());
                match &result {
                    Ok(()) => metrics.record_unit_operation(unit.id()),
                    Err(e) => {
                        tracing::error!("Failed to store key '{}' on node {}: {}", key, unit.id(), e)
                    }
                }
                // Receiver is gone once quorum was decided
                let _ = tx.send(result);
            });
            outcomes.push(rx);
        }

        let mut successes = 0;
        let mut pending = outcomes.len();
        while pending > 0 && successes < required {
            pending -= 1;
            match tokio::time::timeout(self.write_timeout, outcomes.next()).await {
                Ok(Some(Ok(Ok(())))) => successes += 1,
                Ok(Some(Ok(Err(_)))) => {}
                Ok(Some(Err(_))) => {
                    tracing::error!("Write task for key '{}' ended without an outcome", key);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Timed out after {:?} waiting for a write outcome on key '{}'",
                        self.write_timeout,
                        key
                    );
                }
            }
        }

        if successes < required {
            tracing::warn!(
                "Write quorum not reached for key '{}': {}/{}",
                key,
                successes,
                required
            );
            return Err(Error::QuorumNotReached {
                needed: required,
                got: successes,
            });
        }

        Ok(successes)
    }

    /// Read closest-first; the first replica holding the key answers
    pub async fn get(&self, key: &str) -> Option<String> {
        let start = Instant::now();
        let candidates = self.ring.replica_set(key, self.replication_factor);
        if candidates.is_empty() {
            return None;
        }

        let mut found = None;
        for unit in &candidates {
            match unit.get(key) {
                Ok(Some(value)) => {
                    self.metrics.record_unit_operation(unit.id());
                    found = Some(value);
                    break;
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to read key '{}' from node {}: {}", key, unit.id(), e),
            }
        }

        self.metrics.record_read(start.elapsed());
        found
    }

    /// Delete from every replica; true if any replica held the key
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        for unit in self.ring.replica_set(key, self.replication_factor) {
            match unit.remove(key) {
                Ok(Some(_)) => {
                    removed = true;
                    self.metrics.record_unit_operation(unit.id());
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to remove key '{}' from node {}: {}", key, unit.id(), e)
                }
            }
        }

        if removed {
            self.metrics.record_delete();
        }
        removed
    }

    /// Admit a new unit and start pulling its share of the data in the background.
    ///
    /// Returns false, without launching a migration, when the id is taken.
    pub fn add_node(&self, id: &str, host: &str, port: u16) -> bool {
        tracing::info!("Adding node: {} ({}:{})", id, host, port);

        let unit = Arc::new(StorageUnit::new(id, host, port));
        if !self.ring.add_node(unit.clone()) {
            return false;
        }
        self.metrics.record_node_added();

        let guard = self.rebalancing.begin(MigrationKind::Join, id);
        let ring = self.ring.clone();
        let replication_factor = self.replication_factor;
        self.tasks.spawn(async move {
            let _guard = guard;
            tracing::info!("Starting rebalancing after adding node: {}", unit.id());
            let report = migrate_to_new_unit(&ring, &unit, replication_factor).await;
            tracing::info!(
                "Rebalancing completed for node {}: scanned {}, moved {}, copied {}, failed {}",
                report.node_id,
                report.scanned,
                report.moved,
                report.copied,
                report.failed
            );
        });

        true
    }

    /// Take a unit out of the ring and re-home its data in the background.
    pub fn remove_node(&self, id: &str) -> bool {
        tracing::info!("Removing node: {}", id);

        let Some(unit) = self.ring.get(id) else {
            tracing::warn!("Node {} not found", id);
            return false;
        };

        let data = unit.snapshot();
        unit.set_active(false);
        if !self.ring.remove_node(id) {
            return false;
        }
        self.metrics.record_node_removed();

        if data.is_empty() {
            return true;
        }
        if self.ring.active_units().is_empty() {
            tracing::warn!(
                "No remaining active nodes to redistribute {} keys from {}",
                data.len(),
                id
            );
            return true;
        }

        let guard = self.rebalancing.begin(MigrationKind::Leave, id);
        let ring = self.ring.clone();
        let replication_factor = self.replication_factor;
        let node_id = id.to_string();
        self.tasks.spawn(async move {
            let _guard = guard;
            tracing::info!("Redistributing {} keys from {}", data.len(), node_id);
            let report = redistribute(&ring, data, replication_factor).await;
            tracing::info!(
                "Data redistribution from {} completed: {} redistributed, {} failed",
                node_id,
                report.redistributed,
                report.failed
            );
        });

        true
    }

    pub fn all_units(&self) -> Vec<Arc<StorageUnit>> {
        self.ring.all_units()
    }

    pub fn data_distribution(&self) -> BTreeMap<String, usize> {
        self.ring.data_distribution()
    }

    pub fn is_rebalancing(&self) -> bool {
        self.rebalancing.is_rebalancing()
    }

    /// Distinct keys across all units
    pub fn unique_key_count(&self) -> usize {
        self.ring
            .all_units()
            .iter()
            .flat_map(|unit| unit.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn status(&self) -> ClusterStatus {
        let units = self.ring.all_units();
        let snapshot = self.metrics.snapshot();
        ClusterStatus {
            total_units: units.len(),
            active_units: units.iter().filter(|u| u.is_active()).count(),
            is_rebalancing: self.is_rebalancing(),
            total_keys: units.iter().map(|u| u.len()).sum(),
            unique_keys: self.unique_key_count(),
            total_operations: snapshot.total_operations(),
            avg_read_latency_ms: snapshot.average_read_latency_ms,
            avg_write_latency_ms: snapshot.average_write_latency_ms,
            data_distribution: self.data_distribution(),
            timestamp: Utc::now(),
        }
    }

    /// Wait for every migration in flight at call time
    pub async fn wait_for_rebalance(&self) {
        self.rebalancing.wait_all().await;
    }

    /// Wait for all background work, including trailing replica writes
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }

    /// Refuse new background work and drain what is running within `grace`.
    ///
    /// Returns the number of tasks aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        tracing::info!("Shutting down coordinator");
        self.tasks.shutdown(grace).await
    }
}

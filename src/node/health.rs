//! Periodic health monitor
//!
//! Probes every registered unit on a fixed interval. A unit failing its
//! probe while active is deactivated; a unit passing its probe while inactive
//! is reactivated. The last-health-check timestamp is refreshed either way.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::utils::{read_lock, write_lock};
use crate::common::Result;
use crate::coordinator::placement::ConsistentHashRing;
use crate::node::StorageUnit;

/// Liveness test applied to each unit
pub trait HealthProbe: Send + Sync {
    fn probe(&self, unit: &StorageUnit) -> Result<()>;
}

/// Write/read/delete round trip through [`StorageUnit::self_test`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfTestProbe;

impl HealthProbe for SelfTestProbe {
    fn probe(&self, unit: &StorageUnit) -> Result<()> {
        unit.self_test()
    }
}

/// Outcome of one monitoring pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct HealthReport {
    pub checked: usize,
    pub deactivated: Vec<String>,
    pub recovered: Vec<String>,
}

pub struct HealthMonitor {
    ring: Arc<ConsistentHashRing>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    failed: RwLock<Vec<String>>,
}

impl HealthMonitor {
    pub fn new(ring: Arc<ConsistentHashRing>, interval: Duration) -> Self {
        Self {
            ring,
            probe: Arc::new(SelfTestProbe),
            interval,
            failed: RwLock::new(Vec::new()),
        }
    }

    /// Replace the default self-test probe
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ids of units this monitor has deactivated and not yet seen recover
    pub fn failed_nodes(&self) -> Vec<String> {
        read_lock(self.failed.read()).clone()
    }

    /// Probe every unit currently in the ring once
    pub fn check_once(&self) -> HealthReport {
        let mut report = HealthReport::default();

        for unit in self.ring.all_units() {
            report.checked += 1;
            let healthy = match self.probe.probe(&unit) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Probe failed for node {}: {}", unit.id(), e);
                    false
                }
            };

            if !healthy && unit.is_active() {
                tracing::warn!("Node {} failed health check", unit.id());
                unit.set_active(false);
                let mut failed = write_lock(self.failed.write());
                if !failed.iter().any(|id| id == unit.id()) {
                    failed.push(unit.id().to_string());
                }
                report.deactivated.push(unit.id().to_string());
            } else if healthy && !unit.is_active() {
                tracing::info!("Node {} recovered", unit.id());
                unit.set_active(true);
                write_lock(self.failed.write()).retain(|id| id != unit.id());
                report.recovered.push(unit.id().to_string());
            }

            unit.touch_health_check();
        }

        report
    }

    /// Run `check_once` every interval until `shutdown` flips to true
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately; skip it so units get a full interval
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.check_once();
                        if !report.deactivated.is_empty() || !report.recovered.is_empty() {
                            tracing::info!(
                                "Health check: {} checked, {} deactivated, {} recovered",
                                report.checked,
                                report.deactivated.len(),
                                report.recovered.len()
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Health monitor stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use std::collections::HashSet;

    /// Fails the probe for every id in the set
    struct FaultyProbe {
        down: RwLock<HashSet<String>>,
    }

    impl FaultyProbe {
        fn new() -> Self {
            Self {
                down: RwLock::new(HashSet::new()),
            }
        }

        fn set_down(&self, id: &str, down: bool) {
            let mut set = self.down.write().unwrap();
            if down {
                set.insert(id.to_string());
            } else {
                set.remove(id);
            }
        }
    }

    impl HealthProbe for FaultyProbe {
        fn probe(&self, unit: &StorageUnit) -> Result<()> {
            if self.down.read().unwrap().contains(unit.id()) {
                Err(Error::Timeout(format!("probe to {}", unit.id())))
            } else {
                unit.self_test()
            }
        }
    }

    fn ring_with(ids: &[&str]) -> Arc<ConsistentHashRing> {
        let ring = Arc::new(ConsistentHashRing::new(16));
        for id in ids {
            ring.add_node(Arc::new(StorageUnit::new(*id, "localhost", 8000)));
        }
        ring
    }

    #[test]
    fn test_all_healthy() {
        let ring = ring_with(&["n1", "n2"]);
        let monitor = HealthMonitor::new(ring.clone(), Duration::from_secs(30));

        let report = monitor.check_once();
        assert_eq!(report.checked, 2);
        assert!(report.deactivated.is_empty());
        assert!(report.recovered.is_empty());
        assert!(ring.all_units().iter().all(|u| u.is_active()));
    }

    #[test]
    fn test_failure_then_recovery() {
        let ring = ring_with(&["n1", "n2", "n3"]);
        let probe = Arc::new(FaultyProbe::new());
        let monitor =
            HealthMonitor::new(ring.clone(), Duration::from_secs(30)).with_probe(probe.clone());

        probe.set_down("n2", true);
        let report = monitor.check_once();
        assert_eq!(report.deactivated, vec!["n2".to_string()]);
        assert!(!ring.get("n2").unwrap().is_active());
        assert_eq!(monitor.failed_nodes(), vec!["n2".to_string()]);

        // Still down: no double counting
        let report = monitor.check_once();
        assert!(report.deactivated.is_empty());
        assert_eq!(monitor.failed_nodes().len(), 1);

        probe.set_down("n2", false);
        let report = monitor.check_once();
        assert_eq!(report.recovered, vec!["n2".to_string()]);
        assert!(ring.get("n2").unwrap().is_active());
        assert!(monitor.failed_nodes().is_empty());
    }

    #[test]
    fn test_self_test_probe_reactivates_unit() {
        let ring = ring_with(&["n1"]);
        let unit = ring.get("n1").unwrap();
        unit.set_active(false);

        let monitor = HealthMonitor::new(ring, Duration::from_secs(30));
        let report = monitor.check_once();
        assert_eq!(report.recovered, vec!["n1".to_string()]);
        assert!(unit.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_stops_on_shutdown() {
        let ring = ring_with(&["n1"]);
        let probe = Arc::new(FaultyProbe::new());
        probe.set_down("n1", true);
        let monitor = Arc::new(
            HealthMonitor::new(ring.clone(), Duration::from_secs(30)).with_probe(probe),
        );

        let (tx, rx) = watch::channel(false);
        let handle = monitor.clone().start(rx);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!ring.get("n1").unwrap().is_active());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

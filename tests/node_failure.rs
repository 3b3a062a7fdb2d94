//! Unit failure and recovery tests for ringkv

use ringkv::common::ClusterMetrics;
use ringkv::node::{HealthMonitor, HealthProbe};
use ringkv::{ConsistentHashRing, Coordinator, Error, StorageUnit};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn cluster(replication_factor: usize) -> Coordinator {
    let coordinator = Coordinator::with_parts(
        Arc::new(ConsistentHashRing::new(150)),
        Arc::new(ClusterMetrics::new()),
        replication_factor,
        Duration::from_secs(5),
    );
    for (i, id) in ["node1", "node2", "node3"].iter().enumerate() {
        coordinator
            .ring()
            .add_node(Arc::new(StorageUnit::new(*id, "localhost", 8080 + i as u16)));
    }
    coordinator
}

#[tokio::test]
async fn test_minority_failure_is_survived() {
    let coordinator = cluster(3);
    coordinator.put("before", "1").await.unwrap();
    coordinator.wait_idle().await;

    coordinator.ring().get("node2").unwrap().set_active(false);

    assert_eq!(coordinator.get("before").await, Some("1".to_string()));
    coordinator.put("after", "2").await.unwrap();
    assert_eq!(coordinator.get("after").await, Some("2".to_string()));
    assert!(coordinator.delete("before").await);
}

#[tokio::test]
async fn test_writes_fail_without_active_units() {
    let coordinator = cluster(3);
    for unit in coordinator.all_units() {
        unit.set_active(false);
    }

    let err = coordinator.put("k", "v").await.unwrap_err();
    assert!(matches!(err, Error::NoActiveUnits));
    assert!(err.is_retryable());
    assert_eq!(coordinator.get("k").await, None);
    assert_eq!(coordinator.metrics().snapshot().failed_operations, 1);
}

#[tokio::test]
async fn test_inactive_unit_rejects_operations() {
    let unit = StorageUnit::new("node1", "localhost", 8080);
    assert_ok!(unit.put("k", "v"));
    unit.set_active(false);
    assert_err!(unit.self_test().and_then(|_| unit.get("k")));

    assert!(matches!(unit.get("k"), Err(Error::NodeInactive(id)) if id == "node1"));
    assert!(matches!(unit.put("k", "w"), Err(Error::NodeInactive(_))));
    assert!(matches!(unit.remove("k"), Err(Error::NodeInactive(_))));
    assert!(!unit.contains_key("k"));

    unit.set_active(true);
    assert_eq!(unit.get("k").unwrap(), Some("v".to_string()));
}

struct Switchboard {
    down: Mutex<HashSet<String>>,
}

impl HealthProbe for Switchboard {
    fn probe(&self, unit: &StorageUnit) -> ringkv::Result<()> {
        if self.down.lock().unwrap().contains(unit.id()) {
            Err(Error::Timeout(unit.id().to_string()))
        } else {
            unit.self_test()
        }
    }
}

#[tokio::test]
async fn test_health_monitor_failover_and_recovery() {
    let coordinator = cluster(3);
    coordinator.put("k", "v").await.unwrap();
    coordinator.wait_idle().await;

    let probe = Arc::new(Switchboard {
        down: Mutex::new(HashSet::from(["node1".to_string()])),
    });
    let monitor = HealthMonitor::new(coordinator.ring().clone(), Duration::from_secs(30))
        .with_probe(probe.clone());

    let report = monitor.check_once();
    assert_eq!(report.checked, 3);
    assert_eq!(report.deactivated, vec!["node1".to_string()]);
    assert_eq!(coordinator.status().active_units, 2);
    assert!(coordinator
        .ring()
        .replica_set("k", 3)
        .iter()
        .all(|u| u.id() != "node1"));
    assert_eq!(coordinator.get("k").await, Some("v".to_string()));

    probe.down.lock().unwrap().clear();
    let report = monitor.check_once();
    assert_eq!(report.recovered, vec!["node1".to_string()]);
    assert!(monitor.failed_nodes().is_empty());
    assert_eq!(coordinator.status().active_units, 3);
}

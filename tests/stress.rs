//! Stress test for ringkv: concurrent writers, membership churn

use ringkv::common::CoordinatorConfig;
use ringkv::Coordinator;
use std::sync::Arc;
use std::time::Instant;

fn cluster(units: usize) -> Arc<Coordinator> {
    let coordinator = Arc::new(Coordinator::new(&CoordinatorConfig::default()));
    for i in 1..=units {
        coordinator.add_node(&format!("node{}", i), "localhost", 8080 + i as u16);
    }
    coordinator
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_writes() {
    let coordinator = cluster(3);
    coordinator.wait_for_rebalance().await;

    let writers = 10;
    let per_writer = 100;
    let start = Instant::now();

    let mut handles = Vec::new();
    for w in 0..writers {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..per_writer {
                coordinator
                    .put(&format!("w{}_k{}", w, i), &format!("v{}_{}", w, i))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let write_time = start.elapsed();

    for w in 0..writers {
        for i in 0..per_writer {
            assert_eq!(
                coordinator.get(&format!("w{}_k{}", w, i)).await,
                Some(format!("v{}_{}", w, i))
            );
        }
    }

    coordinator.wait_idle().await;
    assert_eq!(coordinator.unique_key_count(), writers * per_writer);
    assert_eq!(
        coordinator.metrics().snapshot().write_operations,
        (writers * per_writer) as u64
    );

    println!("Write {} keys: {:?}", writers * per_writer, write_time);
    assert!(write_time.as_secs_f64() < 30.0, "Write too slow");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_writes_during_membership_change() {
    let coordinator = cluster(3);
    for i in 0..500 {
        coordinator.put(&format!("key{}", i), "v").await.unwrap();
    }
    coordinator.wait_idle().await;

    let writer = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            for i in 500..1000 {
                coordinator.put(&format!("key{}", i), "v").await.unwrap();
            }
        })
    };
    coordinator.add_node("node4", "localhost", 8084);
    coordinator.add_node("node5", "localhost", 8085);
    writer.await.unwrap();
    coordinator.wait_for_rebalance().await;
    coordinator.wait_idle().await;

    assert!(!coordinator.is_rebalancing());
    assert_eq!(coordinator.all_units().len(), 5);
    assert!(coordinator.ring().is_consistent());
    // Racing writes may land on a stale holder, but nothing is lost
    assert_eq!(coordinator.unique_key_count(), 1000);
}

//! Background task bookkeeping
//!
//! [`TaskTracker`] owns every detached task the coordinator spawns (fan-out
//! writes still running after quorum, migrations, redistributions) so that
//! tests can await them and shutdown can drain them. [`RebalanceRegistry`]
//! records which membership migrations are in flight.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TaskTracker {
    tasks: Mutex<JoinSet<()>>,
    running: watch::Sender<usize>,
    closed: AtomicBool,
}

/// Decrements the running count when a tracked future completes or is aborted
struct RunningSlot(watch::Sender<usize>);

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.0.send_modify(|running| *running -= 1);
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            running: watch::channel(0).0,
            closed: AtomicBool::new(false),
        }
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task. Refused (and dropped) once shutdown has begun.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("Task tracker closed, dropping background task");
            return false;
        }
        let mut tasks = lock(&self.tasks);
        Self::reap(&mut tasks);
        self.running.send_modify(|running| *running += 1);
        let slot = RunningSlot(self.running.clone());
        tasks.spawn(async move {
            let _slot = slot;
            task.await;
        });
        true
    }

    // Finished tasks stay in the set until reaped
    fn reap(tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Background task failed: {}", e);
                }
            }
        }
    }

    /// Tasks still running
    pub fn len(&self) -> usize {
        *self.running.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every tracked task (including ones spawned meanwhile) has finished.
    ///
    /// Dropping the returned future leaves the tasks running.
    pub async fn wait_idle(&self) {
        let mut running = self.running.subscribe();
        // The sender lives in `self`, so this only returns once the count hits zero
        let _ = running.wait_for(|running| *running == 0).await;
        Self::reap(&mut lock(&self.tasks));
    }

    /// Stop accepting tasks, wait up to `grace` for running ones, then abort the rest.
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.closed.store(true, Ordering::Release);

        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            return 0;
        }

        let remaining = self.len();
        tracing::warn!(
            "Aborting {} background tasks after {:?} grace period",
            remaining,
            grace
        );
        lock(&self.tasks).abort_all();
        self.wait_idle().await;
        remaining
    }
}

/// Which membership change a migration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    /// Keys moving onto a newly added unit
    Join,
    /// Keys re-replicated away from a removed unit
    Leave,
}

struct InFlight {
    ticket: u64,
    done: watch::Receiver<bool>,
}

/// In-flight migrations keyed by unit id.
///
/// Not a data store: it only answers "is the cluster rebalancing" and lets
/// callers await completion.
#[derive(Default)]
pub struct RebalanceRegistry {
    inflight: Mutex<HashMap<(MigrationKind, String), InFlight>>,
    next_ticket: AtomicU64,
}

/// Registration of one migration; completes (and deregisters) on drop
pub struct MigrationGuard {
    registry: Arc<RebalanceRegistry>,
    key: (MigrationKind, String),
    ticket: u64,
    done: watch::Sender<bool>,
}

impl RebalanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration for `node_id`; it stays in flight until the guard drops
    pub fn begin(self: &Arc<Self>, kind: MigrationKind, node_id: &str) -> MigrationGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        let key = (kind, node_id.to_string());
        lock(&self.inflight).insert(key.clone(), InFlight { ticket, done: rx });
        MigrationGuard {
            registry: self.clone(),
            key,
            ticket,
            done: tx,
        }
    }

    pub fn is_rebalancing(&self) -> bool {
        !lock(&self.inflight).is_empty()
    }

    pub fn in_flight(&self) -> Vec<(MigrationKind, String)> {
        let mut keys: Vec<_> = lock(&self.inflight).keys().cloned().collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1));
        keys
    }

    /// Wait for every migration registered at call time
    pub async fn wait_all(&self) {
        let pending: Vec<watch::Receiver<bool>> = lock(&self.inflight)
            .values()
            .map(|entry| entry.done.clone())
            .collect();
        for mut done in pending {
            // A dropped sender also means the migration is over
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

impl Drop for MigrationGuard {
    fn drop(&mut self) {
        {
            let mut inflight = lock(&self.registry.inflight);
            // A newer migration for the same unit may have replaced ours
            if inflight
                .get(&self.key)
                .is_some_and(|entry| entry.ticket == self.ticket)
            {
                inflight.remove(&self.key);
            }
        }
        let _ = self.done.send(true);
    }
}

//! In-memory storage unit
//!
//! A storage unit is one "node" of the simulated cluster: a string map
//! gated by a liveness flag. Every operation on an inactive unit fails with
//! [`Error::NodeInactive`]. The flag is flipped while holding the map lock,
//! so an operation either runs entirely before a flip or observes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::common::utils::{read_lock, write_lock};
use crate::common::{datetime_from_millis, timestamp_now_millis, Error, Result};

/// Key used by the health self-test round trip
pub const HEALTH_CHECK_KEY: &str = "__health_check__";
const HEALTH_CHECK_VALUE: &str = "ok";

/// Units not probed within this window are reported unhealthy
const HEALTH_STALE_AFTER_MS: i64 = 5 * 60 * 1000;

#[derive(Debug)]
pub struct StorageUnit {
    id: String,
    host: String,
    port: u16,
    storage: RwLock<HashMap<String, String>>,
    active: AtomicBool,
    operation_count: AtomicU64,
    created_at: DateTime<Utc>,
    last_health_check: AtomicI64,
}

/// Serializable view of a unit, as reported by the node listing endpoints
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub active: bool,
    pub healthy: bool,
    pub data_size: usize,
    pub operation_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_health_check: DateTime<Utc>,
}

impl StorageUnit {
    /// Create an active, empty unit
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            host: host.into(),
            port,
            storage: RwLock::new(HashMap::new()),
            active: AtomicBool::new(true),
            operation_count: AtomicU64::new(0),
            created_at: now,
            last_health_check: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, informational only
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NodeInactive(self.id.clone()))
        }
    }

    /// Store a value, returning the previous one
    pub fn put(&self, key: &str, value: &str) -> Result<Option<String>> {
        let mut storage = write_lock(self.storage.write());
        self.ensure_active()?;
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        Ok(storage.insert(key.to_string(), value.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let storage = read_lock(self.storage.read());
        self.ensure_active()?;
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        Ok(storage.get(key).cloned())
    }

    /// Remove a key, returning the removed value
    pub fn remove(&self, key: &str) -> Result<Option<String>> {
        let mut storage = write_lock(self.storage.write());
        self.ensure_active()?;
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        Ok(storage.remove(key))
    }

    /// False for inactive units regardless of contents
    pub fn contains_key(&self, key: &str) -> bool {
        let storage = read_lock(self.storage.read());
        self.is_active() && storage.contains_key(key)
    }

    /// Independent copy of the current contents
    pub fn snapshot(&self) -> HashMap<String, String> {
        read_lock(self.storage.read()).clone()
    }

    pub fn keys(&self) -> Vec<String> {
        read_lock(self.storage.read()).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read_lock(self.storage.read()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        let _storage = write_lock(self.storage.write());
        let was = self.active.swap(active, Ordering::AcqRel);
        if was != active {
            tracing::debug!("Node {} is now {}", self.id, if active { "active" } else { "inactive" });
        }
    }

    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::Relaxed)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_health_check(&self) -> DateTime<Utc> {
        datetime_from_millis(self.last_health_check.load(Ordering::Relaxed))
    }

    pub fn touch_health_check(&self) {
        self.last_health_check
            .store(timestamp_now_millis(), Ordering::Relaxed);
    }

    /// Active and probed recently
    pub fn is_healthy(&self) -> bool {
        let age = timestamp_now_millis() - self.last_health_check.load(Ordering::Relaxed);
        self.is_active() && age < HEALTH_STALE_AFTER_MS
    }

    /// Write/read/delete round trip on the reserved health key.
    ///
    /// Bypasses the liveness gate so that an inactive unit can prove it has
    /// recovered. A user value stored under the reserved key is restored.
    pub fn self_test(&self) -> Result<()> {
        let mut storage = write_lock(self.storage.write());
        let previous = storage.insert(HEALTH_CHECK_KEY.to_string(), HEALTH_CHECK_VALUE.to_string());
        let read_back = storage.get(HEALTH_CHECK_KEY).cloned();
        match previous {
            Some(value) => storage.insert(HEALTH_CHECK_KEY.to_string(), value),
            None => storage.remove(HEALTH_CHECK_KEY),
        };

        if read_back.as_deref() == Some(HEALTH_CHECK_VALUE) {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "self-test round trip failed on node {}",
                self.id
            )))
        }
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            active: self.is_active(),
            healthy: self.is_healthy(),
            data_size: self.len(),
            operation_count: self.operation_count(),
            created_at: self.created_at,
            last_health_check: self.last_health_check(),
        }
    }
}

impl std::fmt::Display for StorageUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node{{id='{}', address='{}', active={}, dataSize={}, operations={}}}",
            self.id,
            self.address(),
            self.is_active(),
            self.len(),
            self.operation_count()
        )
    }
}

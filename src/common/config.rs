//! Configuration for ringkv components

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::common::{Error, Result};

/// Config file the coordinator binary reads when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "ringkv.toml";

/// Prefix for environment overrides, e.g. `RINGKV__COORDINATOR__REPLICATION_FACTOR=2`
pub const ENV_PREFIX: &str = "RINGKV";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Storage units registered at startup
    #[serde(default)]
    pub initial_nodes: Vec<NodeSpec>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A storage unit declared in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Replication factor
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Virtual nodes per storage unit
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,

    /// Per-outcome wait while collecting write acknowledgements
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Health probe period
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Grace period for background tasks on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}
fn default_replication_factor() -> usize {
    3
}
fn default_virtual_nodes() -> usize {
    150
}
fn default_write_timeout() -> u64 {
    5_000
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_shutdown_grace() -> u64 {
    60
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            replication_factor: default_replication_factor(),
            virtual_nodes: default_virtual_nodes(),
            write_timeout_ms: default_write_timeout(),
            health_check_interval_secs: default_health_check_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl CoordinatorConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            initial_nodes: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `RINGKV__*` environment overrides.
    ///
    /// The result is not validated; callers layer their own overrides first
    /// and then call [`Config::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        let coord = &self.coordinator;
        if coord.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if coord.virtual_nodes == 0 {
            return Err(Error::InvalidConfig(
                "virtual_nodes must be at least 1".into(),
            ));
        }
        if coord.write_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "write_timeout_ms must be positive".into(),
            ));
        }
        if coord.health_check_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "health_check_interval_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.initial_nodes {
            if node.id.is_empty() {
                return Err(Error::InvalidConfig("node id cannot be empty".into()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate initial node id: {}",
                    node.id
                )));
            }
        }

        Ok(())
    }
}

//! Common utilities and types shared across ringkv

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod utils;

pub use self::config::{Config, CoordinatorConfig, NodeSpec};
pub use error::{Error, Result};
pub use hash::{key_position, ring_position, virtual_node_label, virtual_node_positions, Position};
pub use metrics::{ClusterMetrics, MetricsSink, MetricsSnapshot};
pub use utils::{datetime_from_millis, duration_ms, parse_duration, timestamp_now_millis};

//! Storage units and their health monitoring
//!
//! Units are in-memory and live inside the coordinator's process; their
//! `host:port` is metadata only and is never dialed.

pub mod health;
pub mod unit;

pub use health::{HealthMonitor, HealthProbe, HealthReport, SelfTestProbe};
pub use unit::{NodeSummary, StorageUnit};

//! Coordinator: membership ring plus quorum routing
//!
//! The coordinator is responsible for:
//! - Placement of keys on units (consistent hashing with virtual nodes)
//! - Quorum writes, closest-first reads and deletes across replica sets
//! - Admission and removal of units, with background data migration
//! - The HTTP request surface and process bootstrap

pub mod cluster;
pub mod http;
pub mod placement;
pub mod rebalance;
pub mod server;
pub mod tasks;

pub use cluster::{ClusterStatus, Coordinator};
pub use placement::{ConsistentHashRing, PlacementTrace, DEFAULT_VIRTUAL_NODES};
pub use rebalance::{MigrationReport, RedistributionReport};
pub use server::{bootstrap, CoordinatorServer};
pub use tasks::{MigrationKind, RebalanceRegistry, TaskTracker};

//! # ringkv
//!
//! An in-process replicated, partitioned key-value store with:
//! - Consistent hashing with virtual nodes for placement
//! - Quorum writes, closest-first reads and replica-wide deletes
//! - Background data migration when units join or leave
//! - A periodic health monitor toggling unit liveness
//! - An HTTP API over the coordinator
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Coordinator                │
//! │   - quorum put / get / delete           │
//! │   - add / remove node + rebalancing     │
//! └───────────┬─────────────────────────────┘
//!             │ replica set (ring walk)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼─────────┐
//! │ Unit n1    │   │ Unit n2    │   │ Unit n3    │
//! │ 150 vnodes │   │ 150 vnodes │   │ 150 vnodes │
//! │ in-memory  │   │ in-memory  │   │ in-memory  │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! ringkv-coord serve \
//!   --bind 0.0.0.0:5000 \
//!   --node n1@localhost:8081 \
//!   --node n2@localhost:8082 \
//!   --node n3@localhost:8083
//! ```
//!
//! ### Talk to it
//! ```bash
//! curl -X POST localhost:5000/data -H 'content-type: application/json' \
//!   -d '{"key":"user:1","value":"alice"}'
//! curl localhost:5000/data/user:1
//! curl -X POST localhost:5000/nodes -H 'content-type: application/json' \
//!   -d '{"id":"n4","host":"localhost","port":8084}'
//! curl localhost:5000/status
//! ```
//!
//! ### Simulate a load in-process
//! ```bash
//! ringkv-coord simulate --keys 10000 --writers 16 --grow
//! ```

pub mod common;
pub mod coordinator;
pub mod node;
pub mod ops;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{ClusterStatus, ConsistentHashRing, Coordinator};
pub use node::StorageUnit;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

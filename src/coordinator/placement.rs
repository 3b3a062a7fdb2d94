//! Consistent hash ring with virtual nodes
//!
//! Every storage unit owns `V` positions on a `u32` ring, one per label
//! `id:index`. A key is placed by hashing it onto the ring and walking
//! clockwise from the first position at or after it, wrapping past the
//! largest position back to the smallest.
//!
//! The ring owns the position map exclusively and hands out shared
//! `Arc<StorageUnit>` references. Lookups take a read guard and may run in
//! parallel; membership changes take the write guard, so a reader never sees
//! a partially inserted or removed unit.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use crate::common::utils::{read_lock, write_lock};
use crate::common::{key_position, virtual_node_positions, Position};
use crate::node::StorageUnit;

/// Virtual nodes per storage unit unless configured otherwise
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

struct Member {
    unit: Arc<StorageUnit>,
    positions: BTreeSet<Position>,
}

#[derive(Default)]
struct RingState {
    positions: BTreeMap<Position, Arc<StorageUnit>>,
    members: BTreeMap<String, Member>,
}

impl RingState {
    /// Ring entries in clockwise order starting at the ceiling of `start`
    fn walk_from(&self, start: Position) -> impl Iterator<Item = (&Position, &Arc<StorageUnit>)> {
        self.positions
            .range(start..)
            .chain(self.positions.range(..start))
    }
}

/// One step of a placement walk, see [`ConsistentHashRing::describe_placement`]
#[derive(Debug, Clone, Serialize)]
pub struct PlacementStep {
    pub position: Position,
    pub node_id: String,
    pub active: bool,
    pub selected: bool,
}

/// Diagnostic trace of how a key's replica set was built
#[derive(Debug, Clone, Serialize)]
pub struct PlacementTrace {
    pub key: String,
    pub key_position: Position,
    pub replication_factor: usize,
    pub steps: Vec<PlacementStep>,
    pub selected: Vec<String>,
}

pub struct ConsistentHashRing {
    state: RwLock<RingState>,
    virtual_nodes: usize,
}

impl ConsistentHashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            state: RwLock::new(RingState::default()),
            virtual_nodes,
        }
    }

    /// Virtual nodes per storage unit
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Register a unit and its virtual nodes.
    ///
    /// Returns false (and leaves the ring untouched) if the id is already present.
    pub fn add_node(&self, unit: Arc<StorageUnit>) -> bool {
        let mut state = write_lock(self.state.write());
        if state.members.contains_key(unit.id()) {
            tracing::warn!("Node {} is already in the ring", unit.id());
            return false;
        }

        let positions: BTreeSet<Position> = virtual_node_positions(unit.id(), self.virtual_nodes)
            .into_iter()
            .collect();
        for &position in &positions {
            if let Some(previous) = state.positions.insert(position, unit.clone()) {
                tracing::warn!(
                    "Position {} collision: {} takes over from {}",
                    position,
                    unit.id(),
                    previous.id()
                );
            }
        }

        tracing::debug!(
            "Added node {} with {} virtual nodes",
            unit.id(),
            positions.len()
        );
        state
            .members
            .insert(unit.id().to_string(), Member { unit, positions });
        true
    }

    /// Drop every position recorded for `node_id`; false if it was never added
    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut state = write_lock(self.state.write());
        let Some(member) = state.members.remove(node_id) else {
            return false;
        };

        for position in &member.positions {
            // A colliding later insert may have taken this slot over
            if state
                .positions
                .get(position)
                .is_some_and(|owner| owner.id() == node_id)
            {
                state.positions.remove(position);
            }
        }

        tracing::debug!(
            "Removed node {} with {} virtual nodes",
            node_id,
            member.positions.len()
        );
        true
    }

    /// Nearest live owner of `key`, walking clockwise from its position
    pub fn locate(&self, key: &str) -> Option<Arc<StorageUnit>> {
        let state = read_lock(self.state.read());
        let found = state
            .walk_from(key_position(key))
            .map(|(_, unit)| unit)
            .find(|unit| unit.is_active())
            .cloned();
        found
    }

    /// Ordered, de-duplicated live units responsible for `key`.
    ///
    /// Length is `min(replication_factor, live units)`; order is ring-walk
    /// order (closest first).
    pub fn replica_set(&self, key: &str, replication_factor: usize) -> Vec<Arc<StorageUnit>> {
        if replication_factor == 0 {
            return Vec::new();
        }

        let state = read_lock(self.state.read());
        let mut seen = HashSet::new();
        let mut replicas = Vec::with_capacity(replication_factor);

        for (_, unit) in state.walk_from(key_position(key)) {
            if unit.is_active() && seen.insert(unit.id()) {
                replicas.push(unit.clone());
                if replicas.len() >= replication_factor {
                    break;
                }
            }
        }

        if replicas.is_empty() && !state.members.is_empty() {
            tracing::warn!("No active nodes available for key: {}", key);
        }
        replicas
    }

    /// Every registered unit, live or not, ordered by id
    pub fn all_units(&self) -> Vec<Arc<StorageUnit>> {
        read_lock(self.state.read())
            .members
            .values()
            .map(|m| m.unit.clone())
            .collect()
    }

    pub fn active_units(&self) -> Vec<Arc<StorageUnit>> {
        read_lock(self.state.read())
            .members
            .values()
            .filter(|m| m.unit.is_active())
            .map(|m| m.unit.clone())
            .collect()
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<StorageUnit>> {
        read_lock(self.state.read())
            .members
            .get(node_id)
            .map(|m| m.unit.clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        read_lock(self.state.read()).members.contains_key(node_id)
    }

    pub fn unique_node_count(&self) -> usize {
        read_lock(self.state.read()).members.len()
    }

    /// Number of occupied ring positions
    pub fn virtual_node_count(&self) -> usize {
        read_lock(self.state.read()).positions.len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(self.state.read()).positions.is_empty()
    }

    /// Positions recorded for a unit, ascending
    pub fn positions_of(&self, node_id: &str) -> Vec<Position> {
        read_lock(self.state.read())
            .members
            .get(node_id)
            .map(|m| m.positions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Key count held by each unit
    pub fn data_distribution(&self) -> BTreeMap<String, usize> {
        read_lock(self.state.read())
            .members
            .iter()
            .map(|(id, m)| (id.clone(), m.unit.len()))
            .collect()
    }

    /// Problems found in the position map; empty when consistent.
    ///
    /// Every member must own exactly `V` positions and each of them must
    /// resolve back to that member.
    pub fn inconsistencies(&self) -> Vec<String> {
        let state = read_lock(self.state.read());
        let mut problems = Vec::new();

        for (id, member) in &state.members {
            if member.positions.len() != self.virtual_nodes {
                problems.push(format!(
                    "node {} has {} virtual nodes, expected {}",
                    id,
                    member.positions.len(),
                    self.virtual_nodes
                ));
            }
            for position in &member.positions {
                match state.positions.get(position) {
                    Some(owner) if owner.id() == id => {}
                    Some(owner) => problems.push(format!(
                        "position {} of node {} is owned by {}",
                        position,
                        id,
                        owner.id()
                    )),
                    None => problems.push(format!(
                        "position {} of node {} is missing from the ring",
                        position, id
                    )),
                }
            }
        }

        problems
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistencies().is_empty()
    }

    /// Primary-owner counts for `key_count` synthetic keys
    pub fn key_distribution(&self, key_count: usize) -> BTreeMap<String, usize> {
        let mut distribution = BTreeMap::new();
        for i in 0..key_count {
            if let Some(unit) = self.locate(&format!("test_key_{}", i)) {
                *distribution.entry(unit.id().to_string()).or_insert(0) += 1;
            }
        }
        distribution
    }

    /// Step-by-step record of the walk performed by `replica_set`
    pub fn describe_placement(&self, key: &str, replication_factor: usize) -> PlacementTrace {
        let state = read_lock(self.state.read());
        let position = key_position(key);
        let mut steps = Vec::new();
        let mut selected: Vec<String> = Vec::new();

        if replication_factor > 0 {
            for (&pos, unit) in state.walk_from(position) {
                let pick = unit.is_active() && !selected.iter().any(|id| id == unit.id());
                if pick {
                    selected.push(unit.id().to_string());
                }
                steps.push(PlacementStep {
                    position: pos,
                    node_id: unit.id().to_string(),
                    active: unit.is_active(),
                    selected: pick,
                });
                if selected.len() >= replication_factor {
                    break;
                }
            }
        }

        PlacementTrace {
            key: key.to_string(),
            key_position: position,
            replication_factor,
            steps,
            selected,
        }
    }
}

impl Default for ConsistentHashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

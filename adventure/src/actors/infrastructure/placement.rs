//! Placement: consistent hashing over the active membership view.
//!
//! - **`HashRing`** maps identities onto nodes. Each node contributes a fixed
//!   number of virtual points; an identity belongs to the first point at or
//!   after its own hash, wrapping around. Adding or removing a node only moves
//!   the identities adjacent to that node's points.
//! - **`PlacementDirector`** is the seam the router and host call. The
//!   default [`ConsistentHashPlacement`] rebuilds its ring whenever the view
//!   epoch changes.
//! - **`PlacementCache`** remembers resolved owners together with the epoch
//!   they were computed at. An entry from an older epoch is treated as absent
//!   and recomputed lazily.
//!
//! Equal ring positions are ordered by the node address's lexical order, so
//! every node that shares a view computes the same owner.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;

use rapidhash::RapidHasher;

use crate::NetworkAddress;
use crate::actors::types::ActorId;

use super::membership::MembershipView;

/// Virtual points per node.
pub const DEFAULT_VIRTUAL_NODES: u32 = 64;

const RING_SEED: u64 = 0x5EED_AD7E_0000_0001;

/// Errors from placement operations.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// No active node to place the actor on.
    #[error("no candidates available for actor {id}")]
    NoCandidates {
        /// The actor that could not be placed.
        id: ActorId,
    },
}

fn ring_hash(bytes: &[u8]) -> u64 {
    let mut hasher = RapidHasher::new(RING_SEED);
    hasher.write(bytes);
    hasher.finish()
}

/// A consistent-hash ring.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// Sorted by hash, then by address.
    points: Vec<(u64, NetworkAddress)>,
}

impl HashRing {
    /// Build a ring with `virtual_nodes` points per node.
    pub fn new(nodes: &[NetworkAddress], virtual_nodes: u32) -> Self {
        let mut points = Vec::with_capacity(nodes.len() * virtual_nodes as usize);
        for node in nodes {
            for i in 0..virtual_nodes {
                let label = format!("{}#{}", node, i);
                points.push((ring_hash(label.as_bytes()), node.clone()));
            }
        }
        Self::from_points(points)
    }

    /// Build a ring from explicit points.
    pub fn from_points(mut points: Vec<(u64, NetworkAddress)>) -> Self {
        points.sort();
        Self { points }
    }

    /// Hash of an identity's position on the ring.
    pub fn position(id: &ActorId) -> u64 {
        ring_hash(id.to_string().as_bytes())
    }

    /// The node owning `id`, or `None` for an empty ring.
    pub fn owner(&self, id: &ActorId) -> Option<&NetworkAddress> {
        self.owner_of_position(Self::position(id))
    }

    /// The node owning a raw ring position.
    pub fn owner_of_position(&self, position: u64) -> Option<&NetworkAddress> {
        if self.points.is_empty() {
            return None;
        }
        let index = self.points.partition_point(|(hash, _)| *hash < position);
        let (_, node) = &self.points[index % self.points.len()];
        Some(node)
    }

    /// Number of points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the ring has no point.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decides which node should host an actor.
pub trait PlacementDirector: fmt::Debug {
    /// Choose the owning node of `id` under `view`.
    fn place(&self, id: &ActorId, view: &MembershipView) -> Result<NetworkAddress, PlacementError>;
}

/// Consistent-hash placement over the view's active nodes.
#[derive(Debug)]
pub struct ConsistentHashPlacement {
    virtual_nodes: u32,
    ring: RefCell<Option<(u64, HashRing)>>,
}

impl ConsistentHashPlacement {
    /// Placement with `virtual_nodes` points per node.
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes,
            ring: RefCell::new(None),
        }
    }
}

impl Default for ConsistentHashPlacement {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl PlacementDirector for ConsistentHashPlacement {
    fn place(&self, id: &ActorId, view: &MembershipView) -> Result<NetworkAddress, PlacementError> {
        let mut cached = self.ring.borrow_mut();
        let stale = !matches!(&*cached, Some((epoch, _)) if *epoch == view.epoch);
        if stale {
            *cached = Some((view.epoch, HashRing::new(&view.addresses(), self.virtual_nodes)));
        }

        cached
            .as_ref()
            .and_then(|(_, ring)| ring.owner(id))
            .cloned()
            .ok_or_else(|| PlacementError::NoCandidates { id: id.clone() })
    }
}

/// A resolved owner and the view epoch it was computed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementEntry {
    /// Owning node.
    pub node: NetworkAddress,
    /// Epoch of the view used to compute it.
    pub epoch: u64,
}

/// Caller-side cache of placements.
///
/// Every entry belongs to the last view epoch the cache saw. Looking up or
/// inserting under a different epoch empties it first.
#[derive(Debug, Default)]
pub struct PlacementCache {
    entries: RefCell<HashMap<ActorId, PlacementEntry>>,
    epoch: Cell<u64>,
}

impl PlacementCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&self, epoch: u64) {
        if self.epoch.replace(epoch) != epoch {
            self.entries.borrow_mut().clear();
        }
    }

    /// Cached owner of `id`, if it was computed at `current_epoch`.
    pub fn get(&self, id: &ActorId, current_epoch: u64) -> Option<NetworkAddress> {
        self.observe(current_epoch);
        self.entries
            .borrow()
            .get(id)
            .filter(|entry| entry.epoch == current_epoch)
            .map(|entry| entry.node.clone())
    }

    /// Remember an owner computed at `epoch`.
    pub fn insert(&self, id: ActorId, node: NetworkAddress, epoch: u64) {
        self.observe(epoch);
        self.entries
            .borrow_mut()
            .insert(id, PlacementEntry { node, epoch });
    }

    /// Forget one identity.
    pub fn invalidate(&self, id: &ActorId) {
        self.entries.borrow_mut().remove(id);
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Number of cached entries (any epoch).
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

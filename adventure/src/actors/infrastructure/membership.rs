//! Membership directory: the shared table of cluster nodes.
//!
//! Every node owns one row keyed by its address. The owning node refreshes
//! its heartbeat; any node may append a suspicion or declare the row `Dead`.
//! All writes are compare-and-swap on a per-row version, so concurrent
//! monitors never overwrite each other blindly.
//!
//! The protocol driving this table lives in [`MembershipAgent`](super::MembershipAgent).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::NetworkAddress;

/// Status of a node in the cluster.
///
/// ```text
/// Joining → Active ⇄ Suspect → Dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Node announced itself but is not serving yet.
    Joining,
    /// Node is fully operational and serving requests.
    Active,
    /// At least one peer saw the node's heartbeat go stale.
    Suspect,
    /// Node is declared gone. Terminal for this generation.
    Dead,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joining => write!(f, "Joining"),
            Self::Active => write!(f, "Active"),
            Self::Suspect => write!(f, "Suspect"),
            Self::Dead => write!(f, "Dead"),
        }
    }
}

/// One stale-heartbeat observation recorded against a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspicion {
    /// The node that made the observation.
    pub by: NetworkAddress,
    /// When it was made.
    pub at: Duration,
}

/// A row of the membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    /// Network address of the node (row key).
    pub address: NetworkAddress,
    /// Incarnation number of the process at that address. A restarted
    /// process joins with a larger generation.
    pub generation: u64,
    /// Current lifecycle status.
    pub status: NodeStatus,
    /// Last heartbeat written by the owning node.
    pub last_heartbeat: Duration,
    /// When `status` last changed.
    pub status_changed_at: Duration,
    /// Outstanding suspicions, cleared by the next heartbeat.
    pub suspicions: Vec<Suspicion>,
    /// Human-readable name (for logging/debugging).
    pub name: String,
}

impl MembershipEntry {
    /// Whether the node may receive work.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Compare-and-swap token of one membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowVersion(pub u64);

/// A membership row together with its CAS token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
    /// The row contents.
    pub entry: MembershipEntry,
    /// The row's current version.
    pub version: RowVersion,
}

/// The active node set as seen by one node at one epoch.
///
/// Members are `Active` entries ordered by address. The epoch is local to
/// the observing node and only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipView {
    /// Local view epoch.
    pub epoch: u64,
    /// Active members ordered by address.
    pub members: Vec<MembershipEntry>,
}

impl MembershipView {
    /// Addresses of the active members, in order.
    pub fn addresses(&self) -> Vec<NetworkAddress> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }

    /// Whether the given node is an active member.
    pub fn contains(&self, address: &NetworkAddress) -> bool {
        self.members.iter().any(|m| &m.address == address)
    }

    /// Number of active members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the view has no active member.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Errors from membership operations.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// The node was not found in the membership table.
    #[error("node not found: {address}")]
    NotFound {
        /// The address that was not found.
        address: NetworkAddress,
    },

    /// A conditional write lost against a concurrent writer.
    #[error("membership row version conflict for {address}")]
    VersionConflict {
        /// The row that changed underneath the writer.
        address: NetworkAddress,
    },

    /// The local node has been declared dead (or superseded by a newer
    /// generation) and must stop serving.
    #[error("node {address} was evicted from the cluster")]
    Evicted {
        /// The evicted node.
        address: NetworkAddress,
    },

    /// The backing table failed.
    #[error("membership table error: {0}")]
    Table(String),
}

/// Shared, durable registry of cluster nodes.
///
/// Any table offering consistent reads and conditional writes per row
/// satisfies this contract.
#[async_trait::async_trait(?Send)]
pub trait MembershipTable: fmt::Debug {
    /// Read every row.
    async fn read_all(&self) -> Result<Vec<VersionedEntry>, MembershipError>;

    /// Read one row.
    async fn read_entry(
        &self,
        address: &NetworkAddress,
    ) -> Result<Option<VersionedEntry>, MembershipError>;

    /// Conditionally write a row.
    ///
    /// `expected = None` inserts and fails if the row exists; `Some(v)`
    /// replaces the row only if its version is still `v`.
    async fn write_entry(
        &self,
        entry: MembershipEntry,
        expected: Option<RowVersion>,
    ) -> Result<RowVersion, MembershipError>;

    /// Conditionally delete a row.
    async fn delete_entry(
        &self,
        address: &NetworkAddress,
        expected: RowVersion,
    ) -> Result<(), MembershipError>;
}

/// In-memory membership table shared by the nodes of one process.
///
/// All nodes see writes immediately, which is stronger than the
/// read-your-writes guarantee the protocol needs.
#[derive(Debug, Default)]
pub struct InMemoryMembershipTable {
    rows: RefCell<HashMap<NetworkAddress, VersionedEntry>>,
    counter: Cell<u64>,
}

impl InMemoryMembershipTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> RowVersion {
        let val = self.counter.get() + 1;
        self.counter.set(val);
        RowVersion(val)
    }
}

#[async_trait::async_trait(?Send)]
impl MembershipTable for InMemoryMembershipTable {
    async fn read_all(&self) -> Result<Vec<VersionedEntry>, MembershipError> {
        let mut rows: Vec<VersionedEntry> = self.rows.borrow().values().cloned().collect();
        rows.sort_by(|a, b| a.entry.address.cmp(&b.entry.address));
        Ok(rows)
    }

    async fn read_entry(
        &self,
        address: &NetworkAddress,
    ) -> Result<Option<VersionedEntry>, MembershipError> {
        Ok(self.rows.borrow().get(address).cloned())
    }

    async fn write_entry(
        &self,
        entry: MembershipEntry,
        expected: Option<RowVersion>,
    ) -> Result<RowVersion, MembershipError> {
        let mut rows = self.rows.borrow_mut();
        let actual = rows.get(&entry.address).map(|row| row.version);
        if actual != expected {
            return Err(MembershipError::VersionConflict {
                address: entry.address,
            });
        }

        let version = self.next_version();
        rows.insert(entry.address.clone(), VersionedEntry { entry, version });
        Ok(version)
    }

    async fn delete_entry(
        &self,
        address: &NetworkAddress,
        expected: RowVersion,
    ) -> Result<(), MembershipError> {
        let mut rows = self.rows.borrow_mut();
        match rows.get(address) {
            Some(row) if row.version == expected => {
                rows.remove(address);
                Ok(())
            }
            Some(_) => Err(MembershipError::VersionConflict {
                address: address.clone(),
            }),
            None => Err(MembershipError::NotFound {
                address: address.clone(),
            }),
        }
    }
}

//! Actor infrastructure: membership, directory, and placement.

pub(crate) mod agent;
pub(crate) mod directory;
pub(crate) mod membership;
pub(crate) mod placement;

pub use agent::{MembershipAgent, MembershipConfig, ViewChange, ViewChangeCallback};
pub use directory::{ActorDirectory, DirectoryError, InMemoryDirectory};
pub use membership::{
    InMemoryMembershipTable, MembershipEntry, MembershipError, MembershipTable, MembershipView,
    NodeStatus, RowVersion, Suspicion, VersionedEntry,
};
pub use placement::{
    ConsistentHashPlacement, DEFAULT_VIRTUAL_NODES, HashRing, PlacementCache, PlacementDirector, PlacementEntry,
    PlacementError,
};

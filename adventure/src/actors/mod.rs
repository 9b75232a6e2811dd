//! Virtual actor runtime.
//!
//! Actors are addressed by identity, never by location. The first message
//! to an identity activates it on the node that owns it under consistent
//! hashing of the membership view; the activation is then fenced by a
//! directory incarnation and persists its state with compare-and-swap
//! writes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │               Caller side                             │
//! │  ActorRef → ActorRouter → PlacementCache / Director   │
//! │  ActorMessage carries identity + method + body        │
//! ├───────────────────────────────────────────────────────┤
//! │               Transport                               │
//! │  InProcessNetwork → ActorHost of the owning node      │
//! ├───────────────────────────────────────────────────────┤
//! │               Host side                               │
//! │  ActorHost → activation task → ActorHandler::dispatch │
//! │  ActorDirectory (fencing) + ActorStateStore (CAS)     │
//! ├───────────────────────────────────────────────────────┤
//! │               Membership                              │
//! │  MembershipAgent ↔ MembershipTable → MembershipView   │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Turn model
//!
//! One message at a time per activation. The activation dequeues a message,
//! checks it still owns the identity, calls the handler, persists, and only
//! then replies and moves on.

// --- Core types ---
mod actor_ref;
mod types;

pub use actor_ref::{ActorHandle, ActorRef};
pub use types::{
    ActorAddress, ActorFault, ActorId, ActorKey, ActorKind, ActorMessage, ActorResponse,
    CacheInvalidation, Incarnation,
};

// --- Transport ---
mod transport;

pub use transport::{InProcessNetwork, InProcessTransport, Transport, TransportError};

// --- Runtime ---
mod runtime;

pub use runtime::{
    ActivationState, ActorContext, ActorError, ActorHandler, ActorHost, ActorRouter,
    DeactivationHint, DeactivationReason, HostSettings, MAX_FORWARDS, RetryPolicy,
};

// --- Node lifecycle ---
mod node;

pub use node::{
    AdventureNode, AdventureNodeBuilder, ClusterConfig, ClusterConfigBuilder, ClusterConfigError,
    NodeConfig, NodeConfigBuilder, NodeError, NodeLifecycle,
};

// --- Infrastructure ---
mod infrastructure;

pub use infrastructure::{
    ActorDirectory, ConsistentHashPlacement, DEFAULT_VIRTUAL_NODES, DirectoryError, HashRing,
    InMemoryDirectory, InMemoryMembershipTable, MembershipAgent, MembershipConfig,
    MembershipEntry, MembershipError, MembershipTable, MembershipView, NodeStatus,
    PlacementCache, PlacementDirector, PlacementEntry, PlacementError, RowVersion, Suspicion,
    VersionedEntry, ViewChange, ViewChangeCallback,
};

// --- State persistence ---
mod state;

pub use state::{
    ActorStateError, ActorStateStore, InMemoryStateStore, PersistentState, StoredState,
    VersionToken,
};

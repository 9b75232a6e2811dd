//! Core virtual actor types.
//!
//! These types form the messaging contract between actor callers and the
//! hosts that run them. The transport treats `ActorMessage` and
//! `ActorResponse` as opaque payloads.
//!
//! # Design
//!
//! - `ActorKind` is a closed enum: the runtime's dispatch table is keyed by it.
//! - `ActorId` is `ActorKind` + an `ActorKey` (a GUID or an integer). It is
//!   both the directory key and the persistence key.
//! - `Incarnation` is the fencing token: every activation of an identity gets
//!   a strictly larger one than the activation before it.
//! - `ActorResponse` carries either the serialized reply or an `ActorFault`
//!   telling the caller what went wrong and whether to retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::NetworkAddress;

/// The kind of an actor, which selects the handler that runs it.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Debug)]
pub enum ActorKind {
    /// A player character.
    Player,
    /// A room of the world.
    Room,
    /// A monster roaming the world.
    Monster,
}

impl ActorKind {
    /// Stable lowercase name, used as the first half of the persistence key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Room => "room",
            Self::Monster => "monster",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key of an actor within its kind.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Debug)]
pub enum ActorKey {
    /// GUID key (players).
    Guid(Uuid),
    /// Integer key (rooms, monsters).
    Integer(i64),
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guid(id) => write!(f, "{}", id),
            Self::Integer(n) => write!(f, "{}", n),
        }
    }
}

/// Full virtual actor identity = kind + key.
///
/// # Examples
///
/// ```rust
/// use adventure::actors::{ActorId, ActorKind};
///
/// let room = ActorId::room(0);
/// assert_eq!(room.kind, ActorKind::Room);
/// assert_eq!(room.to_string(), "room/0");
/// ```
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Debug)]
pub struct ActorId {
    /// The kind of actor (identifies the handler).
    pub kind: ActorKind,
    /// The instance key.
    pub key: ActorKey,
}

impl ActorId {
    /// Create a new actor ID.
    pub fn new(kind: ActorKind, key: ActorKey) -> Self {
        Self { kind, key }
    }

    /// Identity of a player.
    pub fn player(id: Uuid) -> Self {
        Self::new(ActorKind::Player, ActorKey::Guid(id))
    }

    /// Identity of a room.
    pub fn room(id: i64) -> Self {
        Self::new(ActorKind::Room, ActorKey::Integer(id))
    }

    /// Identity of a monster.
    pub fn monster(id: i64) -> Self {
        Self::new(ActorKind::Monster, ActorKey::Integer(id))
    }

    /// The key under which this actor's state is persisted:
    /// `(kind name, key string)`.
    pub fn storage_key(&self) -> (&'static str, String) {
        (self.kind.as_str(), self.key.to_string())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// Fencing token of one activation.
///
/// Issued by the [`ActorDirectory`](super::ActorDirectory) when an activation
/// registers. A host that finds a larger incarnation registered for an
/// identity it hosts has been superseded and must deactivate its copy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Incarnation(pub u64);

impl Incarnation {
    /// The incarnation that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Incarnation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inc-{}", self.0)
    }
}

/// Full address of an actor activation: identity + node + incarnation.
///
/// This is the value stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorAddress {
    /// The actor's identity.
    pub actor_id: ActorId,
    /// The node hosting this activation.
    pub node: NetworkAddress,
    /// Fencing token of this activation.
    pub incarnation: Incarnation,
}

impl ActorAddress {
    /// Create a new actor address.
    pub fn new(actor_id: ActorId, node: NetworkAddress, incarnation: Incarnation) -> Self {
        Self {
            actor_id,
            node,
            incarnation,
        }
    }
}

/// Message payload for virtual actor calls.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ActorMessage {
    /// The target actor instance.
    pub target: ActorId,
    /// Optional sender actor (for actor-to-actor calls).
    pub sender: Option<ActorId>,
    /// Method discriminant within the actor kind (1, 2, 3, …).
    pub method: u32,
    /// Serialized method-specific request body.
    pub body: Vec<u8>,
    /// Number of times this message has been forwarded (prevents loops).
    pub forward_count: u8,
}

/// Failure reported by the node that received an [`ActorMessage`].
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActorFault {
    /// The receiving activation cannot take the message (not the owner,
    /// superseded, deactivating, or lost a write race). Re-resolve and retry.
    #[error("retry elsewhere")]
    RetryElsewhere,
    /// The actor could not be activated or its state could not be persisted.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The actor is tombstoned.
    #[error("actor gone")]
    Gone,
    /// The method discriminant is not recognized by the handler.
    #[error("unknown method: {0}")]
    UnknownMethod(u32),
    /// The handler rejected the request.
    #[error("handler error: {0}")]
    Handler(String),
}

impl ActorFault {
    /// Whether the caller should re-resolve the placement and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryElsewhere | Self::Unavailable(_))
    }
}

/// Response from a virtual actor.
///
/// May include a `cache_invalidation` hint when the message was forwarded
/// because the caller's placement cache was stale.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ActorResponse {
    /// Serialized method-specific response body, or a fault.
    pub body: Result<Vec<u8>, ActorFault>,
    /// Optional cache invalidation hint piggybacked on the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_invalidation: Option<CacheInvalidation>,
}

impl ActorResponse {
    /// A successful response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            body: Ok(body),
            cache_invalidation: None,
        }
    }

    /// A failed response.
    pub fn fault(fault: ActorFault) -> Self {
        Self {
            body: Err(fault),
            cache_invalidation: None,
        }
    }
}

/// Cache invalidation hint sent when a message was forwarded.
///
/// When a node receives an `ActorMessage` for an actor it doesn't own, it
/// forwards the message and attaches this hint so the caller can fix its
/// placement cache.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CacheInvalidation {
    /// The actor whose placement was stale.
    pub actor_id: ActorId,
    /// The node that was incorrectly cached.
    pub invalid_node: NetworkAddress,
    /// The node the message was forwarded to.
    pub valid_node: Option<NetworkAddress>,
}

//! Actor state persistence: durable storage for virtual actor state.
//!
//! Given an actor identity, the store reads and writes serialized state with
//! version-token based optimistic concurrency control.
//!
//! # Design
//!
//! - `ActorStateStore` is a trait so implementations can range from a simple
//!   in-memory map (tests, local clusters) to a real key/value table keyed by
//!   `(actor kind, actor key)`.
//! - Every write is a compare-and-swap on the version token. `None` as the
//!   expected version means "the record must not exist yet". A mismatch is
//!   reported as `VersionConflict` and nothing is written.
//! - Version tokens are strictly increasing across successful writes.
//! - Records may carry an expiry. An expired record reads as absent.
//! - State is stored as opaque bytes. Serialization is handled by
//!   [`PersistentState<T>`](super::PersistentState).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::time::{TimeProvider, TokioTimeProvider};

/// Optimistic concurrency token attached to every stored record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct VersionToken(pub u64);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorStateError {
    /// Write failed because the stored version does not match the expected one.
    #[error("version conflict: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        /// The version the caller expected (`None` = record absent).
        expected: Option<VersionToken>,
        /// The version currently in the store (`None` = record absent).
        actual: Option<VersionToken>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic store error (unreachable backend, throttling, ...).
    #[error("store error: {0}")]
    Store(String),
}

/// A stored actor state entry: serialized data plus its version.
#[derive(Debug, Clone)]
pub struct StoredState {
    /// Serialized state bytes.
    pub data: Vec<u8>,
    /// Optimistic concurrency token.
    pub version: VersionToken,
    /// When the record stops being readable, if it expires at all.
    pub expires_at: Option<Duration>,
}

/// Trait for durable actor state storage.
///
/// Keyed by actor kind name and actor key string. No Send bounds, matching
/// the single-threaded execution model of a node.
#[async_trait::async_trait(?Send)]
pub trait ActorStateStore: fmt::Debug {
    /// Read the stored state for an actor.
    ///
    /// Returns `Ok(None)` if no state has been written for this actor, or if
    /// the record has expired.
    async fn read_state(
        &self,
        actor_kind: &str,
        actor_key: &str,
    ) -> Result<Option<StoredState>, ActorStateError>;

    /// Write state for an actor (compare-and-swap).
    ///
    /// `expected_version = None` succeeds only if no live record exists;
    /// `Some(v)` succeeds only if the live record has version `v`.
    /// `ttl` sets the record's expiry relative to now.
    ///
    /// Returns the new version on success.
    async fn write_state(
        &self,
        actor_kind: &str,
        actor_key: &str,
        data: Vec<u8>,
        expected_version: Option<VersionToken>,
        ttl: Option<Duration>,
    ) -> Result<VersionToken, ActorStateError>;

    /// Clear (delete) the stored state for an actor.
    ///
    /// If `expected_version` is `Some`, the clear succeeds only if the live
    /// record has that version. If `None`, the clear is unconditional.
    async fn clear_state(
        &self,
        actor_kind: &str,
        actor_key: &str,
        expected_version: Option<VersionToken>,
    ) -> Result<(), ActorStateError>;
}

/// In-memory state store.
///
/// All state lives in a `HashMap` shared by every node of an in-process
/// cluster. Versions come from one store-wide counter. The store can be made
/// unavailable to exercise failure paths.
pub struct InMemoryStateStore {
    entries: RefCell<HashMap<(String, String), StoredState>>,
    counter: Cell<u64>,
    available: Cell<bool>,
    time: Rc<dyn TimeProvider>,
}

impl fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("entries", &self.entries.borrow().len())
            .field("counter", &self.counter.get())
            .field("available", &self.available.get())
            .finish()
    }
}

impl InMemoryStateStore {
    /// Create a new empty store using tokio's clock for expiry.
    pub fn new() -> Self {
        Self::with_time(Rc::new(TokioTimeProvider::new()))
    }

    /// Create a new empty store reading expiry against the given clock.
    pub fn with_time(time: Rc<dyn TimeProvider>) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            counter: Cell::new(0),
            available: Cell::new(true),
            time,
        }
    }

    /// Make every subsequent operation fail with [`ActorStateError::Store`]
    /// (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// Number of live (non-expired) records.
    pub fn len(&self) -> usize {
        let now = self.time.now();
        self.entries
            .borrow()
            .values()
            .filter(|entry| !is_expired(entry, now))
            .count()
    }

    /// Whether the store holds no live record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), ActorStateError> {
        if self.available.get() {
            Ok(())
        } else {
            Err(ActorStateError::Store("store unavailable".to_string()))
        }
    }

    fn next_version(&self) -> VersionToken {
        let val = self.counter.get() + 1;
        self.counter.set(val);
        VersionToken(val)
    }

    fn live_version(&self, key: &(String, String)) -> Option<VersionToken> {
        let now = self.time.now();
        self.entries
            .borrow()
            .get(key)
            .filter(|entry| !is_expired(entry, now))
            .map(|entry| entry.version)
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(entry: &StoredState, now: Duration) -> bool {
    entry.expires_at.is_some_and(|at| at <= now)
}

#[async_trait::async_trait(?Send)]
impl ActorStateStore for InMemoryStateStore {
    async fn read_state(
        &self,
        actor_kind: &str,
        actor_key: &str,
    ) -> Result<Option<StoredState>, ActorStateError> {
        self.check_available()?;
        let key = (actor_kind.to_string(), actor_key.to_string());
        let now = self.time.now();
        Ok(self
            .entries
            .borrow()
            .get(&key)
            .filter(|entry| !is_expired(entry, now))
            .cloned())
    }

    async fn write_state(
        &self,
        actor_kind: &str,
        actor_key: &str,
        data: Vec<u8>,
        expected_version: Option<VersionToken>,
        ttl: Option<Duration>,
    ) -> Result<VersionToken, ActorStateError> {
        self.check_available()?;
        let key = (actor_kind.to_string(), actor_key.to_string());

        let actual = self.live_version(&key);
        if actual != expected_version {
            tracing::debug!(
                kind = actor_kind,
                key = actor_key,
                ?expected_version,
                ?actual,
                "state write rejected"
            );
            return Err(ActorStateError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        let version = self.next_version();
        let expires_at = ttl.map(|ttl| self.time.now() + ttl);
        self.entries.borrow_mut().insert(
            key,
            StoredState {
                data,
                version,
                expires_at,
            },
        );
        Ok(version)
    }

    async fn clear_state(
        &self,
        actor_kind: &str,
        actor_key: &str,
        expected_version: Option<VersionToken>,
    ) -> Result<(), ActorStateError> {
        self.check_available()?;
        let key = (actor_kind.to_string(), actor_key.to_string());

        if let Some(expected) = expected_version {
            let actual = self.live_version(&key);
            if actual != Some(expected) {
                return Err(ActorStateError::VersionConflict {
                    expected: Some(expected),
                    actual,
                });
            }
        }

        self.entries.borrow_mut().remove(&key);
        Ok(())
    }
}

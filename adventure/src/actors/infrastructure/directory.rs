//! Actor directory: activation registry and fencing-token issuer.
//!
//! The directory answers "which activation of this identity is current?".
//! Placement decides where an actor *should* live; the directory records
//! where it *does* live and with which [`Incarnation`].
//!
//! # Register semantics
//!
//! Unlike a first-writer-wins registry, `register()` always succeeds and
//! always hands out a new incarnation, strictly larger than any incarnation
//! previously issued for that identity (the counter survives `unregister`).
//! The newest registration becomes current. An older activation that later
//! looks itself up sees a different incarnation and knows it has been
//! superseded: it deactivates instead of writing.
//!
//! - `register(id, node)` → new current `ActorAddress`
//! - `lookup(id)` → current `ActorAddress?`
//! - `unregister(address)` → removes only if the incarnation still matches
//! - `unregister_members(nodes)` → batch cleanup on node death

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::NetworkAddress;
use crate::actors::types::{ActorAddress, ActorId, Incarnation};

/// Errors from directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The directory backend could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Registry of current activations.
#[async_trait::async_trait(?Send)]
pub trait ActorDirectory: fmt::Debug {
    /// Look up the current activation of an actor.
    async fn lookup(&self, id: &ActorId) -> Result<Option<ActorAddress>, DirectoryError>;

    /// Record a new activation of `id` on `node` and return its address,
    /// carrying a fresh incarnation.
    async fn register(
        &self,
        id: &ActorId,
        node: &NetworkAddress,
    ) -> Result<ActorAddress, DirectoryError>;

    /// Remove an activation.
    ///
    /// Only removes the entry if its incarnation matches, so a stale
    /// activation never erases its successor. Returns whether an entry was
    /// removed.
    async fn unregister(&self, address: &ActorAddress) -> Result<bool, DirectoryError>;

    /// Remove all entries hosted on the given nodes. Called when nodes are
    /// declared dead.
    async fn unregister_members(
        &self,
        nodes: &[NetworkAddress],
    ) -> Result<Vec<ActorAddress>, DirectoryError>;

    /// List all current entries. Order is unspecified.
    async fn list_all(&self) -> Result<Vec<ActorAddress>, DirectoryError>;
}

/// In-memory directory shared by the nodes of one process.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: RefCell<HashMap<ActorId, ActorAddress>>,
    last_incarnation: RefCell<HashMap<ActorId, Incarnation>>,
}

impl InMemoryDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait(?Send)]
impl ActorDirectory for InMemoryDirectory {
    async fn lookup(&self, id: &ActorId) -> Result<Option<ActorAddress>, DirectoryError> {
        Ok(self.entries.borrow().get(id).cloned())
    }

    async fn register(
        &self,
        id: &ActorId,
        node: &NetworkAddress,
    ) -> Result<ActorAddress, DirectoryError> {
        let incarnation = {
            let mut last = self.last_incarnation.borrow_mut();
            let next = last.get(id).copied().unwrap_or_default().next();
            last.insert(id.clone(), next);
            next
        };

        let address = ActorAddress::new(id.clone(), node.clone(), incarnation);
        let previous = self
            .entries
            .borrow_mut()
            .insert(id.clone(), address.clone());

        if let Some(previous) = previous {
            tracing::debug!(
                actor = %id,
                superseded = %previous.incarnation,
                superseded_node = %previous.node,
                incarnation = %incarnation,
                "directory entry superseded"
            );
        }
        Ok(address)
    }

    async fn unregister(&self, address: &ActorAddress) -> Result<bool, DirectoryError> {
        let mut entries = self.entries.borrow_mut();
        let matches = entries
            .get(&address.actor_id)
            .is_some_and(|current| current.incarnation == address.incarnation);
        if matches {
            entries.remove(&address.actor_id);
        }
        Ok(matches)
    }

    async fn unregister_members(
        &self,
        nodes: &[NetworkAddress],
    ) -> Result<Vec<ActorAddress>, DirectoryError> {
        let mut entries = self.entries.borrow_mut();
        let mut removed = Vec::new();
        entries.retain(|_id, addr| {
            if nodes.contains(&addr.node) {
                removed.push(addr.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn list_all(&self) -> Result<Vec<ActorAddress>, DirectoryError> {
        Ok(self.entries.borrow().values().cloned().collect())
    }
}

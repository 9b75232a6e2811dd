//! One activation's view of its stored record.
//!
//! The host loads a [`PersistentState`] while activating, lends the decoded
//! value to the handler for each turn and writes it back with the version it
//! last saw. A write that loses the race surfaces as
//! [`ActorStateError::VersionConflict`], which is how a stale activation
//! learns it has been superseded.

use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::JsonCodec;
use crate::actors::types::ActorId;

use super::store::{ActorStateError, ActorStateStore, VersionToken};

/// Decoded actor state plus the version it was read at.
pub struct PersistentState<T> {
    value: T,
    version: Option<VersionToken>,
    store: Rc<dyn ActorStateStore>,
    actor_kind: &'static str,
    actor_key: String,
    ttl: Option<Duration>,
}

impl<T: Serialize + DeserializeOwned + Default> PersistentState<T> {
    /// Read the record for `actor_id`.
    ///
    /// An actor that has never been written starts from `T::default()`.
    /// Every later write refreshes the record's expiry to `ttl`.
    pub async fn load(
        store: Rc<dyn ActorStateStore>,
        actor_id: &ActorId,
        ttl: Option<Duration>,
    ) -> Result<Self, ActorStateError> {
        let (actor_kind, actor_key) = actor_id.storage_key();
        let (value, version) = match store.read_state(actor_kind, &actor_key).await? {
            Some(entry) => (decode(&entry.data)?, Some(entry.version)),
            None => (T::default(), None),
        };

        Ok(Self {
            value,
            version,
            store,
            actor_kind,
            actor_key,
            ttl,
        })
    }

    /// The in-memory value.
    pub fn state(&self) -> &T {
        &self.value
    }

    /// Mutable access; nothing reaches the store until [`write_state`](Self::write_state).
    pub fn state_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Swap the in-memory value, used to roll back a failed turn.
    pub fn replace(&mut self, value: T) -> T {
        std::mem::replace(&mut self.value, value)
    }

    /// Version of the last successful read or write.
    pub fn version(&self) -> Option<VersionToken> {
        self.version
    }

    /// Conditionally write the value back.
    ///
    /// On a conflict the remembered version is left as it was.
    pub async fn write_state(&mut self) -> Result<VersionToken, ActorStateError> {
        let data = JsonCodec
            .encode(&self.value)
            .map_err(|e| ActorStateError::Serialization(e.to_string()))?;

        let written = self
            .store
            .write_state(
                self.actor_kind,
                &self.actor_key,
                data,
                self.version,
                self.ttl,
            )
            .await?;

        self.version = Some(written);
        Ok(written)
    }
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ActorStateError> {
    JsonCodec
        .decode(data)
        .map_err(|e| ActorStateError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde::Deserialize;

    use super::*;
    use crate::actors::InMemoryStateStore;

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shelf {
        label: String,
        things: BTreeSet<String>,
    }

    fn store() -> Rc<dyn ActorStateStore> {
        Rc::new(InMemoryStateStore::new())
    }

    #[tokio::test]
    async fn test_unwritten_actor_starts_from_default() {
        let shelf = PersistentState::<Shelf>::load(store(), &ActorId::room(1), None)
            .await
            .expect("load");

        assert!(shelf.version().is_none());
        assert_eq!(shelf.state(), &Shelf::default());
    }

    #[tokio::test]
    async fn test_written_value_survives_reload() {
        let store = store();
        let id = ActorId::room(1);

        let mut shelf = PersistentState::<Shelf>::load(store.clone(), &id, None)
            .await
            .expect("load");
        shelf.state_mut().label = "Hall".into();
        shelf.state_mut().things.insert("lamp".into());
        let written = shelf.write_state().await.expect("write");

        let mut again = PersistentState::<Shelf>::load(store, &id, None)
            .await
            .expect("reload");
        assert_eq!(again.version(), Some(written));
        assert_eq!(again.state().label, "Hall");
        assert!(again.state().things.contains("lamp"));

        again.state_mut().things.clear();
        again.write_state().await.expect("write after reload");
    }

    #[tokio::test]
    async fn test_superseded_copy_loses_the_write() {
        let store = store();
        let id = ActorId::room(2);

        let mut current = PersistentState::<Shelf>::load(store.clone(), &id, None)
            .await
            .expect("load current");
        let mut stale = PersistentState::<Shelf>::load(store, &id, None)
            .await
            .expect("load stale");

        current.state_mut().things.insert("key".into());
        current.write_state().await.expect("current writes first");

        stale.state_mut().things.insert("rope".into());
        assert!(matches!(
            stale.write_state().await,
            Err(ActorStateError::VersionConflict { .. })
        ));
        assert!(stale.version().is_none());
    }

    #[tokio::test]
    async fn test_replace_rolls_back_without_writing() {
        let store = store();
        let id = ActorId::room(3);

        let mut shelf = PersistentState::<Shelf>::load(store.clone(), &id, None)
            .await
            .expect("load");
        let snapshot = shelf.state().clone();
        shelf.state_mut().label = "half-done".into();
        shelf.replace(snapshot);

        assert_eq!(shelf.state(), &Shelf::default());
        assert!(
            store
                .read_state("room", "3")
                .await
                .expect("read")
                .is_none()
        );
    }
}

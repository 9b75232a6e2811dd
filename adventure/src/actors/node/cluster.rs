//! Cluster configuration: shared state for all nodes in a cluster.
//!
//! [`ClusterConfig`] bundles the membership table, activation directory,
//! state store, network and clock that nodes share. In-process, every node
//! holds a clone of the same `ClusterConfig`, giving them one table, one
//! directory and one store.
//!
//! # Example
//!
//! ```rust,ignore
//! let cluster = ClusterConfig::builder()
//!     .cluster_id("dev")
//!     .service_id("adventure")
//!     .build()?;
//! ```

use std::fmt;
use std::rc::Rc;

use crate::actors::{
    ActorDirectory, ActorStateStore, InMemoryDirectory, InMemoryMembershipTable,
    InMemoryStateStore, InProcessNetwork, MembershipTable,
};
use crate::time::{TimeProvider, TokioTimeProvider};

/// Shared cluster configuration.
#[derive(Clone)]
pub struct ClusterConfig {
    cluster_id: String,
    service_id: String,
    membership: Rc<dyn MembershipTable>,
    directory: Rc<dyn ActorDirectory>,
    state_store: Rc<dyn ActorStateStore>,
    network: Rc<InProcessNetwork>,
    time: Rc<dyn TimeProvider>,
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("cluster_id", &self.cluster_id)
            .field("service_id", &self.service_id)
            .field("membership", &self.membership)
            .field("directory", &self.directory)
            .field("state_store", &self.state_store)
            .field("network", &self.network)
            .finish()
    }
}

impl ClusterConfig {
    /// Start building a cluster configuration.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Identifier of the cluster (deployment).
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Identifier of the service running on the cluster.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// The shared membership table.
    pub fn membership(&self) -> &Rc<dyn MembershipTable> {
        &self.membership
    }

    /// The shared actor directory.
    pub fn directory(&self) -> &Rc<dyn ActorDirectory> {
        &self.directory
    }

    /// The shared actor state store.
    pub fn state_store(&self) -> &Rc<dyn ActorStateStore> {
        &self.state_store
    }

    /// The network connecting the nodes.
    pub fn network(&self) -> &Rc<InProcessNetwork> {
        &self.network
    }

    /// The shared clock.
    pub fn time(&self) -> &Rc<dyn TimeProvider> {
        &self.time
    }
}

/// Builder for [`ClusterConfig`].
#[derive(Default)]
pub struct ClusterConfigBuilder {
    cluster_id: Option<String>,
    service_id: Option<String>,
    membership: Option<Rc<dyn MembershipTable>>,
    directory: Option<Rc<dyn ActorDirectory>>,
    state_store: Option<Rc<dyn ActorStateStore>>,
    network: Option<Rc<InProcessNetwork>>,
    time: Option<Rc<dyn TimeProvider>>,
}

impl ClusterConfigBuilder {
    /// Set the cluster identifier (required).
    pub fn cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    /// Set the service identifier (required).
    pub fn service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    /// Set the membership table.
    ///
    /// If not set, defaults to [`InMemoryMembershipTable`].
    pub fn membership(mut self, membership: Rc<dyn MembershipTable>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Set the actor directory.
    ///
    /// If not set, defaults to [`InMemoryDirectory`].
    pub fn directory(mut self, directory: Rc<dyn ActorDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the actor state store.
    ///
    /// If not set, defaults to an [`InMemoryStateStore`] on the cluster
    /// clock.
    pub fn state_store(mut self, store: Rc<dyn ActorStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Set the network.
    pub fn network(mut self, network: Rc<InProcessNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the clock.
    ///
    /// If not set, defaults to [`TokioTimeProvider`].
    pub fn time(mut self, time: Rc<dyn TimeProvider>) -> Self {
        self.time = Some(time);
        self
    }

    /// Build the cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster or service identifier is missing or
    /// empty.
    pub fn build(self) -> Result<ClusterConfig, ClusterConfigError> {
        let cluster_id = self
            .cluster_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ClusterConfigError::MissingClusterId)?;
        let service_id = self
            .service_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ClusterConfigError::MissingServiceId)?;

        let time = self
            .time
            .unwrap_or_else(|| Rc::new(TokioTimeProvider::new()));
        let state_store = self
            .state_store
            .unwrap_or_else(|| Rc::new(InMemoryStateStore::with_time(time.clone())));

        Ok(ClusterConfig {
            cluster_id,
            service_id,
            membership: self
                .membership
                .unwrap_or_else(|| Rc::new(InMemoryMembershipTable::new())),
            directory: self
                .directory
                .unwrap_or_else(|| Rc::new(InMemoryDirectory::new())),
            state_store,
            network: self
                .network
                .unwrap_or_else(|| Rc::new(InProcessNetwork::new())),
            time,
        })
    }
}

/// Errors from building a [`ClusterConfig`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClusterConfigError {
    /// No cluster identifier was provided.
    #[error("cluster config requires a cluster id")]
    MissingClusterId,

    /// No service identifier was provided.
    #[error("cluster config requires a service id")]
    MissingServiceId,
}

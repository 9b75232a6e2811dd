//! Node lifecycle: cluster configuration, per-node configuration, and the
//! node runtime that ties them together.

pub(crate) mod cluster;
pub(crate) mod config;
pub(crate) mod lifecycle;

pub use cluster::{ClusterConfig, ClusterConfigBuilder, ClusterConfigError};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use lifecycle::{AdventureNode, AdventureNodeBuilder, NodeError, NodeLifecycle};

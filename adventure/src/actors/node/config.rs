//! Per-node configuration for [`AdventureNode`](super::AdventureNode).
//!
//! Separates node-level settings (address, membership timing, activation
//! policy, retries) from cluster-level settings
//! ([`ClusterConfig`](super::ClusterConfig)).

use std::time::Duration;

use crate::NetworkAddress;
use crate::actors::{DEFAULT_VIRTUAL_NODES, HostSettings, MembershipConfig, RetryPolicy};

/// Per-node configuration.
///
/// # Example
///
/// ```rust,ignore
/// // Defaults everywhere except the address
/// let config = NodeConfig::for_address(addr);
///
/// // Full control via builder
/// let config = NodeConfig::builder(addr)
///     .heartbeat_interval(Duration::from_millis(500))
///     .idle_timeout(Duration::from_secs(60))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    address: NetworkAddress,
    name: Option<String>,
    membership: MembershipConfig,
    host: HostSettings,
    request_retry: RetryPolicy,
    virtual_nodes: u32,
    sweep_interval: Duration,
}

impl NodeConfig {
    /// Create a node config with only the address set.
    pub fn for_address(address: NetworkAddress) -> Self {
        Self::builder(address).build()
    }

    /// Start building a node configuration.
    pub fn builder(address: NetworkAddress) -> NodeConfigBuilder {
        NodeConfigBuilder {
            config: NodeConfig {
                address,
                name: None,
                membership: MembershipConfig::default(),
                host: HostSettings::default(),
                request_retry: RetryPolicy::default(),
                virtual_nodes: DEFAULT_VIRTUAL_NODES,
                sweep_interval: Duration::from_secs(60),
            },
        }
    }

    /// The node's network address.
    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    /// Human-readable node name, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Membership protocol timing.
    pub fn membership(&self) -> &MembershipConfig {
        &self.membership
    }

    /// Activation settings.
    pub fn host(&self) -> &HostSettings {
        &self.host
    }

    /// Retry policy for outgoing actor requests.
    pub fn request_retry(&self) -> RetryPolicy {
        self.request_retry
    }

    /// Points per node on the placement ring.
    pub fn virtual_nodes(&self) -> u32 {
        self.virtual_nodes
    }

    /// Period of the idle/fencing sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Clone)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the node name used in the membership table.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Replace the whole membership configuration.
    pub fn membership(mut self, membership: MembershipConfig) -> Self {
        self.config.membership = membership;
        self
    }

    /// Heartbeat (and probe) period.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.membership.heartbeat_interval = interval;
        self
    }

    /// Missed heartbeats before a peer counts as stale.
    pub fn missed_heartbeats_limit(mut self, limit: u32) -> Self {
        self.config.membership.missed_heartbeats_limit = limit;
        self
    }

    /// Independent suspicions needed to declare a peer dead.
    pub fn suspicion_confirmations(mut self, confirmations: usize) -> Self {
        self.config.membership.suspicion_confirmations = confirmations;
        self
    }

    /// How long dead rows stay in the membership table.
    pub fn dead_entry_grace(mut self, grace: Duration) -> Self {
        self.config.membership.dead_entry_grace = grace;
        self
    }

    /// Default idle timeout for activations.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.host.idle_timeout = timeout;
        self
    }

    /// Expiry of persisted actor state, `None` for no expiry.
    pub fn state_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.host.state_ttl = ttl;
        self
    }

    /// Retries for loading state during activation.
    pub fn activation_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.host.activation_retry = retry;
        self
    }

    /// Retries for outgoing actor requests.
    pub fn request_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.request_retry = retry;
        self
    }

    /// Points per node on the placement ring.
    pub fn virtual_nodes(mut self, virtual_nodes: u32) -> Self {
        self.config.virtual_nodes = virtual_nodes.max(1);
        self
    }

    /// Period of the idle/fencing sweep.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Build the node configuration (infallible).
    pub fn build(self) -> NodeConfig {
        self.config
    }
}

//! Startup configuration.
//!
//! Every setting can come from a command-line flag or an `ADVENTURE_*`
//! environment variable. [`AdventureArgs::into_settings`] validates the raw
//! values; the binary treats any error as fatal and refuses to start.

use std::time::Duration;

use clap::Parser;

use crate::NetworkAddress;
use crate::actors::{HostSettings, MembershipConfig, NodeConfig};

/// Invalid or incomplete startup configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting has an unusable value.
    #[error("invalid value for `{name}`: {reason}")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Raw command-line and environment settings.
#[derive(Parser, Debug, Clone)]
#[command(name = "adventure")]
#[command(about = "Multiplayer text adventure on virtual actors", long_about = None)]
pub struct AdventureArgs {
    /// Cluster identifier shared by all nodes of a deployment
    #[arg(long, env = "ADVENTURE_CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Service identifier, stable across deployments
    #[arg(long, env = "ADVENTURE_SERVICE_ID")]
    pub service_id: Option<String>,

    /// Interval between membership heartbeats and probes, in milliseconds
    #[arg(long, env = "ADVENTURE_HEARTBEAT_INTERVAL_MS", default_value = "1000")]
    pub heartbeat_interval_ms: u64,

    /// Missed heartbeats before a node is suspected
    #[arg(long, env = "ADVENTURE_MISSED_HEARTBEATS", default_value = "3")]
    pub missed_heartbeats: u32,

    /// Suspicions needed to declare a node dead
    #[arg(long, env = "ADVENTURE_SUSPICION_CONFIRMATIONS", default_value = "2")]
    pub suspicion_confirmations: usize,

    /// How long dead membership rows are kept, in milliseconds
    #[arg(long, env = "ADVENTURE_DEAD_ENTRY_GRACE_MS", default_value = "60000")]
    pub dead_entry_grace_ms: u64,

    /// Idle time before an activation is collected, in seconds
    #[arg(long, env = "ADVENTURE_IDLE_TIMEOUT_SECS", default_value = "600")]
    pub idle_timeout_secs: u64,

    /// Expiry of persisted actor state, in seconds (0 keeps state forever)
    #[arg(long, env = "ADVENTURE_STATE_TTL_SECS", default_value = "432000")]
    pub state_ttl_secs: u64,

    /// Table holding actor state
    #[arg(long, env = "ADVENTURE_GRAIN_TABLE", default_value = "adventure-grains")]
    pub grain_table: String,

    /// Table holding cluster membership
    #[arg(long, env = "ADVENTURE_CLUSTER_TABLE", default_value = "adventure-cluster")]
    pub cluster_table: String,

    /// Region of the backing store
    #[arg(long, env = "ADVENTURE_REGION", default_value = "local")]
    pub region: String,

    /// Number of in-process nodes to start
    #[arg(long, env = "ADVENTURE_NODES", default_value = "2")]
    pub nodes: usize,

    /// Port of the first node; the others follow
    #[arg(long, env = "ADVENTURE_BASE_PORT", default_value = "11111")]
    pub base_port: u16,
}

/// Where the backing store lives. Opaque to the in-memory backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Table holding actor state.
    pub grain_table: String,
    /// Table holding cluster membership.
    pub cluster_table: String,
    /// Store region.
    pub region: String,
}

/// Validated settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Cluster identifier.
    pub cluster_id: String,
    /// Service identifier.
    pub service_id: String,
    /// Membership timing.
    pub membership: MembershipConfig,
    /// Activation settings.
    pub host: HostSettings,
    /// Backing store location.
    pub store: StoreSettings,
    /// Number of in-process nodes.
    pub nodes: usize,
    /// Port of the first node.
    pub base_port: u16,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn positive(value: u64, name: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl AdventureArgs {
    /// Validate the raw settings.
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let cluster_id = required(self.cluster_id, "cluster-id")?;
        let service_id = required(self.service_id, "service-id")?;

        let heartbeat_ms = positive(self.heartbeat_interval_ms, "heartbeat-interval-ms")?;
        positive(u64::from(self.missed_heartbeats), "missed-heartbeats")?;
        positive(self.suspicion_confirmations as u64, "suspicion-confirmations")?;
        positive(self.idle_timeout_secs, "idle-timeout-secs")?;
        positive(self.nodes as u64, "nodes")?;

        let last_port = u16::try_from(self.nodes - 1)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset));
        if last_port.is_none() {
            return Err(ConfigError::Invalid {
                name: "base-port",
                reason: format!("{} nodes do not fit above port {}", self.nodes, self.base_port),
            });
        }

        let host = HostSettings {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            state_ttl: (self.state_ttl_secs > 0).then(|| Duration::from_secs(self.state_ttl_secs)),
            ..HostSettings::default()
        };

        Ok(Settings {
            cluster_id,
            service_id,
            membership: MembershipConfig {
                heartbeat_interval: Duration::from_millis(heartbeat_ms),
                missed_heartbeats_limit: self.missed_heartbeats,
                suspicion_confirmations: self.suspicion_confirmations,
                dead_entry_grace: Duration::from_millis(self.dead_entry_grace_ms),
            },
            host,
            store: StoreSettings {
                grain_table: self.grain_table,
                cluster_table: self.cluster_table,
                region: self.region,
            },
            nodes: self.nodes,
            base_port: self.base_port,
        })
    }
}

impl Settings {
    /// Address of the `index`-th in-process node.
    pub fn node_address(&self, index: usize) -> NetworkAddress {
        NetworkAddress::localhost(self.base_port.wrapping_add(index as u16))
    }

    /// Node configuration for the `index`-th in-process node.
    pub fn node_config(&self, index: usize) -> NodeConfig {
        let host = &self.host;
        NodeConfig::builder(self.node_address(index))
            .name(format!("{}-{}", self.service_id, index))
            .membership(self.membership.clone())
            .idle_timeout(host.idle_timeout)
            .state_ttl(host.state_ttl)
            .activation_retry(host.activation_retry)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> AdventureArgs {
        let mut argv = vec!["adventure"];
        argv.extend_from_slice(extra);
        AdventureArgs::try_parse_from(argv).expect("parse")
    }

    #[test]
    fn test_defaults() {
        let settings = args(&["--cluster-id", "dev", "--service-id", "adventure"])
            .into_settings()
            .expect("valid");

        assert_eq!(settings.cluster_id, "dev");
        assert_eq!(settings.membership, MembershipConfig::default());
        assert_eq!(settings.host.idle_timeout, Duration::from_secs(600));
        assert_eq!(
            settings.host.state_ttl,
            Some(Duration::from_secs(5 * 24 * 60 * 60))
        );
        assert_eq!(settings.store.grain_table, "adventure-grains");
        assert_eq!(settings.nodes, 2);
        assert_eq!(settings.node_address(1), NetworkAddress::localhost(11112));
    }

    #[test]
    fn test_missing_identity_is_fatal() {
        // Guard against the variables leaking in from the environment.
        let parsed = AdventureArgs {
            cluster_id: None,
            ..args(&["--cluster-id", "x", "--service-id", "y"])
        };
        assert_eq!(
            parsed.into_settings(),
            Err(ConfigError::Missing("cluster-id"))
        );

        let blank = args(&["--cluster-id", "dev", "--service-id", "  "]);
        assert_eq!(blank.into_settings(), Err(ConfigError::Missing("service-id")));
    }

    #[test]
    fn test_invalid_values() {
        let zero = args(&[
            "--cluster-id",
            "dev",
            "--service-id",
            "adventure",
            "--heartbeat-interval-ms",
            "0",
        ]);
        assert!(matches!(
            zero.into_settings(),
            Err(ConfigError::Invalid { name: "heartbeat-interval-ms", .. })
        ));

        let overflow = args(&[
            "--cluster-id",
            "dev",
            "--service-id",
            "adventure",
            "--base-port",
            "65535",
            "--nodes",
            "3",
        ]);
        assert!(matches!(
            overflow.into_settings(),
            Err(ConfigError::Invalid { name: "base-port", .. })
        ));
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let settings = args(&[
            "--cluster-id",
            "dev",
            "--service-id",
            "adventure",
            "--state-ttl-secs",
            "0",
        ])
        .into_settings()
        .expect("valid");
        assert_eq!(settings.host.state_ttl, None);
        assert_eq!(settings.node_config(0).host().state_ttl, None);
    }
}

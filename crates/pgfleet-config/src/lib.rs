//! The pgfleet control plane's configuration schema and loader. This is
//! the only crate in the workspace that knows about TOML files or
//! environment variables; every other component receives already-
//! validated Rust values.
//!
//! No other options are recognized: unknown fields in a configuration file
//! are rejected at startup (`#[serde(deny_unknown_fields)]` on every struct
//! below), against dynamically-typed configuration objects growing
//! silently tolerant of typos.

mod error;
mod loader;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::ConfigError;
pub use loader::ConfigLoader;

/// Top-level configuration for one pgfleet process. A single process hosts
/// one node's participation across every group named in `groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PgfleetConfig {
    pub listen_address: String,
    pub cluster_id: String,
    pub node_id: String,
    pub consensus_endpoints: Vec<String>,
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl Default for PgfleetConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:6432".to_string(),
            cluster_id: String::new(),
            node_id: String::new(),
            consensus_endpoints: Vec::new(),
            groups: Vec::new(),
            pool: PoolConfig::default(),
            probe: ProbeConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

impl PgfleetConfig {
    pub fn group(&self, id: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Rejects configurations that cannot possibly run: no consensus
    /// endpoint, no groups, or a node id absent from every group it is
    /// configured to serve is a config error (exit code 64), not a runtime
    /// surprise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::ValidationError("node_id must not be empty".into()));
        }
        if self.cluster_id.is_empty() {
            return Err(ConfigError::ValidationError("cluster_id must not be empty".into()));
        }
        if uuid::Uuid::parse_str(&self.cluster_id).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "cluster_id {:?} is not a valid UUID (the consensus store's /cluster/id is immutable and UUID-typed)",
                self.cluster_id
            )));
        }
        if self.consensus_endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "consensus_endpoints must list at least one endpoint".into(),
            ));
        }
        if self.groups.is_empty() {
            return Err(ConfigError::ValidationError("groups must list at least one group".into()));
        }
        for group in &self.groups {
            if !group.members.contains_key(&self.node_id) {
                return Err(ConfigError::ValidationError(format!(
                    "node_id {} is not a member of group {}",
                    self.node_id, group.id
                )));
            }
        }
        Ok(())
    }
}

/// One replication group's static membership and thresholds.
/// Shard-to-group placement is not this crate's concern: the group is
/// consumed as-is, a flat list of members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub id: String,
    /// `NodeId` (as a string key) to network endpoint.
    pub members: BTreeMap<String, String>,
    #[serde(rename = "lease_ttl", default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    #[serde(default = "default_lag_threshold_bytes")]
    pub lag_threshold_bytes: u64,
    #[serde(default = "default_lag_threshold_seconds")]
    pub lag_threshold_seconds: u64,
}

impl GroupConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default = "default_max_per_upstream")]
    pub max_per_upstream: usize,
    #[serde(default = "default_max_client_connections")]
    pub max_client_connections: usize,
    #[serde(rename = "enqueue_timeout", default = "default_enqueue_timeout_seconds")]
    pub enqueue_timeout_seconds: u64,
    #[serde(rename = "drain_timeout", default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
    #[serde(rename = "idle_timeout", default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_upstream: default_max_per_upstream(),
            max_client_connections: default_max_client_connections(),
            enqueue_timeout_seconds: default_enqueue_timeout_seconds(),
            drain_timeout_seconds: default_drain_timeout_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
        }
    }
}

impl PoolConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_secs(self.enqueue_timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(rename = "interval", default = "default_probe_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(rename = "timeout", default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_probe_interval_seconds(),
            timeout_seconds: default_probe_timeout_seconds(),
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default = "default_read_only_fallback")]
    pub read_only_fallback_to_primary: bool,
    #[serde(rename = "wait_for_primary", default = "default_wait_for_primary_seconds")]
    pub wait_for_primary_seconds: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            read_only_fallback_to_primary: default_read_only_fallback(),
            wait_for_primary_seconds: default_wait_for_primary_seconds(),
        }
    }
}

impl RoutingConfig {
    pub fn wait_for_primary(&self) -> Duration {
        Duration::from_secs(self.wait_for_primary_seconds)
    }
}

const fn default_lease_ttl_seconds() -> u64 {
    10
}
const fn default_lag_threshold_bytes() -> u64 {
    16 * 1024 * 1024
}
const fn default_lag_threshold_seconds() -> u64 {
    5
}
const fn default_max_per_upstream() -> usize {
    100
}
const fn default_max_client_connections() -> usize {
    10_000
}
const fn default_enqueue_timeout_seconds() -> u64 {
    2
}
const fn default_drain_timeout_seconds() -> u64 {
    10
}
const fn default_idle_timeout_seconds() -> u64 {
    600
}
const fn default_probe_interval_seconds() -> u64 {
    1
}
const fn default_probe_timeout_seconds() -> u64 {
    2
}
const fn default_read_only_fallback() -> bool {
    true
}
const fn default_wait_for_primary_seconds() -> u64 {
    3
}

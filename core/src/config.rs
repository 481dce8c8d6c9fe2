//! Configuration types for TwoPC

use crate::error::TwoPcError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Logging level
    pub log_level: String,

    /// Protocol timing
    pub protocol: ProtocolConfig,

    /// Network configuration
    pub network: NetworkConfig,

    /// Membership discovery
    pub membership: MembershipConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "twopc-node".to_string(),
            log_level: "info".to_string(),
            protocol: ProtocolConfig::default(),
            network: NetworkConfig::default(),
            membership: MembershipConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, TwoPcError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TwoPcError::Config(format!("{}: {}", path.display(), e)))?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, TwoPcError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the protocol cannot run with
    pub fn validate(&self) -> Result<(), TwoPcError> {
        self.protocol.validate()?;
        self.network.validate()
    }
}

/// Protocol timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Coordinator global timer, re-armed on each phase entry
    pub coordinator_timeout_ms: u64,

    /// Cohort per-state timer, re-armed on each non-terminal state entry
    pub cohort_timeout_ms: u64,

    /// Shortest simulated processing delay
    pub min_delay_ms: u64,

    /// Longest simulated processing delay
    pub max_delay_ms: u64,

    /// Granularity of the processing delay
    pub delay_step_ms: u64,

    /// Pause after a terminal phase before the process exits
    pub exit_linger_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            coordinator_timeout_ms: 5000,
            cohort_timeout_ms: 6000,
            min_delay_ms: 500,
            max_delay_ms: 4500,
            delay_step_ms: 500,
            exit_linger_ms: 1000,
        }
    }
}

impl ProtocolConfig {
    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator_timeout_ms)
    }

    pub fn cohort_timeout(&self) -> Duration {
        Duration::from_millis(self.cohort_timeout_ms)
    }

    pub fn exit_linger(&self) -> Duration {
        Duration::from_millis(self.exit_linger_ms)
    }

    pub fn validate(&self) -> Result<(), TwoPcError> {
        if self.coordinator_timeout_ms == 0 || self.cohort_timeout_ms == 0 {
            return Err(TwoPcError::Config("protocol timeouts must be non-zero".into()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(TwoPcError::Config(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.delay_step_ms == 0 && self.min_delay_ms != self.max_delay_ms {
            return Err(TwoPcError::Config("delay_step_ms must be non-zero".into()));
        }
        Ok(())
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address for P2P
    pub listen_addr: String,

    /// Bootstrap nodes, typically the coordinator's address
    pub bootstrap_nodes: Vec<String>,

    /// Enable mDNS for local discovery
    pub enable_mdns: bool,

    /// Fanout topic the coordinator broadcasts on
    pub broadcast_topic: String,

    /// Topic standing in for the coordinator's inbound queue
    pub coordinator_topic: String,

    /// How long setup may wait for peers before giving up
    pub startup_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/40100".to_string(),
            bootstrap_nodes: vec![],
            enable_mdns: true,
            broadcast_topic: "twopc/broadcast/1".to_string(),
            coordinator_topic: "twopc/coordinator/1".to_string(),
            startup_timeout_ms: 30_000,
        }
    }
}

impl NetworkConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), TwoPcError> {
        if self.broadcast_topic.is_empty() || self.coordinator_topic.is_empty() {
            return Err(TwoPcError::Config("topic names must not be empty".into()));
        }
        if self.broadcast_topic == self.coordinator_topic {
            return Err(TwoPcError::Config(
                "broadcast and coordinator topics must differ".into(),
            ));
        }
        Ok(())
    }
}

/// Membership discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Hosts file listing the cohorts
    pub hosts_file: PathBuf,

    /// Address prefix a cohort entry must carry
    pub subnet_prefix: String,

    /// Host name fragment a cohort entry must carry
    pub name_marker: String,

    /// Fixed cohort count, bypassing the hosts file
    pub static_count: Option<usize>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            hosts_file: PathBuf::from("/etc/hosts"),
            subnet_prefix: "192.168.10".to_string(),
            name_marker: "cohort".to_string(),
            static_count: None,
        }
    }
}

//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IslandError, Result};
use crate::island::OverflowPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub island: IslandConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, stamped on outgoing batches
    pub id: String,

    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Island mode behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IslandConfig {
    /// Connectivity polling interval in milliseconds
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Maximum updates buffered while offline
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// What to do when the cache is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Snapshots retained in the chain
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// GET a health URL
    Http,
    /// Connect to host:port
    Tcp,
    /// Always reachable
    #[default]
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub kind: ProbeKind,

    /// URL for `http`, host:port for `tcp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recovery record path (defaults to <data_dir>/recovery/state.json)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Periodic persistence interval in seconds (0 = disabled)
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,

    /// Persist after every committed mode change
    #[serde(default = "default_true")]
    pub persist_on_transition: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Outbox for acknowledged batches (defaults to <data_dir>/outbox)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("/var/lib/island-node") }
fn default_check_interval() -> u64 { 5000 }
fn default_cache_capacity() -> usize { 1000 }
fn default_max_snapshots() -> usize { 100 }
fn default_probe_timeout() -> u64 { 2000 }
fn default_persist_interval() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_http_port() -> u16 { 8088 }

impl Default for IslandConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            cache_capacity: default_cache_capacity(),
            overflow_policy: OverflowPolicy::default(),
            max_snapshots: default_max_snapshots(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::default(),
            target: None,
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            path: None,
            persist_interval_secs: default_persist_interval(),
            persist_on_transition: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_port: default_http_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                id: "node-1".to_string(),
                data_dir: default_data_dir(),
            },
            island: IslandConfig::default(),
            probe: ProbeConfig::default(),
            recovery: RecoveryConfig::default(),
            sync: SyncConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| IslandError::persistence(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| IslandError::Config(e.to_string()))
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| IslandError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| IslandError::persistence(path, e))
    }

    /// Reject parameters the subsystem cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node.id.trim().is_empty() {
            return Err(IslandError::Config("node.id must not be empty".to_string()));
        }
        if self.island.check_interval_ms == 0 {
            return Err(IslandError::Config(
                "island.check_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.island.cache_capacity == 0 {
            return Err(IslandError::Config(
                "island.cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.island.max_snapshots == 0 {
            return Err(IslandError::Config(
                "island.max_snapshots must be at least 1".to_string(),
            ));
        }
        if self.probe.kind != ProbeKind::Static && self.probe.target.is_none() {
            return Err(IslandError::Config(format!(
                "probe.target is required for probe kind {:?}",
                self.probe.kind
            )));
        }
        Ok(())
    }

    pub fn recovery_path(&self) -> PathBuf {
        self.recovery
            .path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("recovery").join("state.json"))
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.sync
            .outbox_dir
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("outbox"))
    }
}

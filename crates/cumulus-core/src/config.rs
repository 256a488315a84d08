//! cumulus.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub server: ServerConfig,
    pub placement: PlacementConfig,
    pub agents: AgentsConfig,
    pub cascade: CascadeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the REST API and agent endpoint listen on.
    pub port: u16,
    /// Directory holding the state database.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/cumulus"),
        }
    }
}

/// Weights used by the placement scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlacementConfig {
    pub instance_weight: u64,
    pub vcpu_weight: u64,
    pub memory_gib_weight: u64,
    /// Added once per hosted workload whose name is a sibling of the new one.
    pub sibling_malus: u64,
    /// Names within this edit distance are siblings.
    pub sibling_max_distance: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            instance_weight: 4,
            vcpu_weight: 2,
            memory_gib_weight: 1,
            sibling_malus: 10_000,
            sibling_max_distance: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Transport-level timeout for a single RPC call.
    pub rpc_timeout_secs: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self { rpc_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Interval of the periodic full recomputation (0 disables it).
    pub interval_secs: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl ControlPlaneConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControlPlaneConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.server.data_dir.join("cumulus.redb")
    }
}

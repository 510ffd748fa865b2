//! Node configuration
//!
//! Read from TOML. Every field has a default, so an empty file (or none at
//! all) yields a working single-node setup.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::NodeRole;
use crate::constants::{
    DEFAULT_API_PORT, DEFAULT_CLUSTER_PORT, DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT,
    DEFAULT_RTSP_PORT, DEFAULT_TIMING_PORT,
};
use crate::error::{Error, Result};

/// Top level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Service name shown to senders
    #[serde(default = "default_name")]
    pub name: String,
    /// Stable identity within the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Log every control request and response
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub node: RoleConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    /// Statically known cluster members
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// Listening ports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_timing_port")]
    pub timing_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_cluster_port")]
    pub cluster_port: u16,
}

/// What this node does in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub role: NodeRole,
    /// Forward received audio to the zone's other speakers
    #[serde(default = "default_true")]
    pub forward: bool,
}

/// Device authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// PEM private key used for challenges and key unwrapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Overrides the address derived from the node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_address: Option<String>,
}

/// A statically configured member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub address: IpAddr,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub role: NodeRole,
}

fn default_name() -> String {
    "Zone Speaker".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_rtsp_port() -> u16 {
    DEFAULT_RTSP_PORT
}

fn default_data_port() -> u16 {
    DEFAULT_DATA_PORT
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_timing_port() -> u16 {
    DEFAULT_TIMING_PORT
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_cluster_port() -> u16 {
    DEFAULT_CLUSTER_PORT
}

fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            node_name: None,
            verbose: false,
            network: NetworkConfig::default(),
            node: RoleConfig::default(),
            crypto: CryptoConfig::default(),
            peers: Vec::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            rtsp_port: DEFAULT_RTSP_PORT,
            data_port: DEFAULT_DATA_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            timing_port: DEFAULT_TIMING_PORT,
            api_port: DEFAULT_API_PORT,
            cluster_port: DEFAULT_CLUSTER_PORT,
        }
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Music,
            forward: true,
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.fill_node_name();
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            let mut config = Self::default();
            config.fill_node_name();
            return Ok(config);
        }
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, else from the user config directory
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => {
                    let mut config = Self::default();
                    config.fill_node_name();
                    Ok(config)
                }
            },
        }
    }

    /// `config.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lan-zone-audio").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Write as pretty TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Cluster identity, generated once per load when not configured
    pub fn node_name(&self) -> &str {
        self.node_name.as_deref().unwrap_or(&self.name)
    }

    fn fill_node_name(&mut self) {
        if self.node_name.is_none() {
            let id = uuid::Uuid::new_v4().simple().to_string();
            self.node_name = Some(format!("node-{}", &id[..8]));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name must not be empty".to_string()));
        }
        if self.node_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Config("node_name must not be empty".to_string()));
        }

        let net = &self.network;
        let ports = [
            ("rtsp_port", net.rtsp_port),
            ("data_port", net.data_port),
            ("api_port", net.api_port),
        ];
        for (i, (name, port)) in ports.iter().enumerate() {
            if let Some((other, _)) = ports[i + 1..].iter().find(|(_, p)| p == port) {
                return Err(Error::Config(format!(
                    "{} and {} both use port {}",
                    name, other, port
                )));
            }
        }

        for peer in &self.peers {
            if peer.name.trim().is_empty() {
                return Err(Error::Config(format!("peer at {} has no name", peer.address)));
            }
        }
        Ok(())
    }
}

//! Configuration module for fragmesh nodes
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use fm_cluster::ClusterOptions;
use fm_core::{HasherKind, NodeUri, DEFAULT_PARTITION_N};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Join configuration
    #[serde(default)]
    pub join: JoinConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Library options for the node at `uri`
    pub fn cluster_options(&self, uri: NodeUri) -> Result<ClusterOptions, ConfigError> {
        if self.cluster.replica_n == 0 {
            return Err(ConfigError::InvalidValue(
                "cluster.replica_n must be at least 1".to_string(),
            ));
        }
        if self.cluster.partition_n == 0 {
            return Err(ConfigError::InvalidValue(
                "cluster.partition_n must be at least 1".to_string(),
            ));
        }
        let data_dir = self
            .node
            .data_dir
            .join(format!("{}_{}", uri.host(), uri.port()));
        Ok(ClusterOptions::new(uri, data_dir)
            .with_replica_n(self.cluster.replica_n)
            .with_partition_n(self.cluster.partition_n))
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address of the first local node; further nodes take the next ports
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Data storage directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            data_dir: default_data_dir(),
        }
    }
}

impl NodeConfig {
    pub fn node_uri(&self) -> Result<NodeUri, ConfigError> {
        self.uri
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("node.uri: {}", e)))
    }
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Co-located nodes to start
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Owners per shard
    #[serde(default = "default_replica_n")]
    pub replica_n: usize,
    /// Partitions shards are hashed into
    #[serde(default = "default_partition_n")]
    pub partition_n: usize,
    /// Hasher: jump, mod or const:<i>
    #[serde(default)]
    pub hasher: HasherKind,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            replica_n: default_replica_n(),
            partition_n: default_partition_n(),
            hasher: HasherKind::default(),
        }
    }
}

/// Join configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Give up waiting for a join after this many seconds; wait forever if unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl JoinConfig {
    /// Get join timeout as Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions

fn default_uri() -> String {
    "http://localhost:10101".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_nodes() -> usize {
    3
}

fn default_replica_n() -> usize {
    1
}

fn default_partition_n() -> usize {
    DEFAULT_PARTITION_N
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

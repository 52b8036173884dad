//! Configuration schema and loader for reefkv nodes.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub listen: SocketAddr,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Replicated log settings.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Watch bus settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for segment files and consensus state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Active segment cap before rotation, in bytes.
    #[serde(default = "default_segment_size_limit")]
    pub segment_size_limit: u64,

    /// Index implementation: "map", "art", or "hybrid".
    #[serde(default = "default_index")]
    pub index: String,

    /// Bloom filter target false-positive rate.
    #[serde(default = "default_filter_fp")]
    pub filter_fp: f64,

    /// Bloom filter expected key cardinality.
    #[serde(default = "default_filter_capacity")]
    pub filter_capacity: usize,

    /// Hot tier capacity (hybrid index).
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,

    /// Warm tier capacity (hybrid index).
    #[serde(default = "default_warm_capacity")]
    pub warm_capacity: usize,

    /// Global hits before a warm entry moves to hot.
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: u64,

    /// Tier frequency below which a full hot tier sheds entries.
    #[serde(default = "default_demote_threshold")]
    pub demote_threshold: u64,

    /// Background maintenance tick, in milliseconds.
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            segment_size_limit: default_segment_size_limit(),
            index: default_index(),
            filter_fp: default_filter_fp(),
            filter_capacity: default_filter_capacity(),
            hot_capacity: default_hot_capacity(),
            warm_capacity: default_warm_capacity(),
            promote_threshold: default_promote_threshold(),
            demote_threshold: default_demote_threshold(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Per-call bound on waiting for commit + apply, in milliseconds.
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            apply_timeout_ms: default_apply_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Per-subscriber event queue capacity.
    #[serde(default = "default_watch_buffer")]
    pub buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer: default_watch_buffer(),
        }
    }
}

// --- Defaults ---

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_segment_size_limit() -> u64 {
    64 * 1024 * 1024
}
fn default_index() -> String {
    "hybrid".to_string()
}
fn default_filter_fp() -> f64 {
    0.01
}
fn default_filter_capacity() -> usize {
    1_000_000
}
fn default_hot_capacity() -> usize {
    10_000
}
fn default_warm_capacity() -> usize {
    100_000
}
fn default_promote_threshold() -> u64 {
    10
}
fn default_demote_threshold() -> u64 {
    5
}
fn default_maintenance_interval_ms() -> u64 {
    1_000
}
fn default_apply_timeout_ms() -> u64 {
    5_000
}
fn default_watch_buffer() -> usize {
    1_000
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.storage;
        if !matches!(s.index.as_str(), "map" | "art" | "hybrid") {
            return Err(ConfigError::Invalid(format!(
                "storage.index must be map, art, or hybrid, got {:?}",
                s.index
            )));
        }
        if s.segment_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "storage.segment_size_limit must be > 0".into(),
            ));
        }
        if !(s.filter_fp > 0.0 && s.filter_fp < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "storage.filter_fp must be in (0, 1), got {}",
                s.filter_fp
            )));
        }
        if s.filter_capacity == 0 {
            return Err(ConfigError::Invalid(
                "storage.filter_capacity must be > 0".into(),
            ));
        }
        if s.hot_capacity == 0 || s.warm_capacity == 0 {
            return Err(ConfigError::Invalid(
                "storage.hot_capacity and storage.warm_capacity must be > 0".into(),
            ));
        }
        if s.promote_threshold == 0 {
            return Err(ConfigError::Invalid(
                "storage.promote_threshold must be >= 1".into(),
            ));
        }
        if s.maintenance_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "storage.maintenance_interval_ms must be > 0".into(),
            ));
        }
        if self.replication.apply_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "replication.apply_timeout_ms must be > 0".into(),
            ));
        }
        if self.watch.buffer == 0 {
            return Err(ConfigError::Invalid("watch.buffer must be > 0".into()));
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

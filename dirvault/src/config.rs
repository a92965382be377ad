//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file. Every field has a default so a
//! partial (or missing) file is fine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for parallel batches (0 = one per core)
    #[serde(default)]
    pub worker_threads: usize,

    /// Containers sampled for the password check when an archive is opened
    #[serde(default = "default_password_sample_size")]
    pub password_sample_size: usize,

    /// Allowed timestamp drift between a file and its archived entry
    #[serde(default = "default_timestamp_tolerance_secs")]
    pub timestamp_tolerance_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Compression applied inside containers
    #[serde(default)]
    pub compression: Compression,

    /// Compression level (None = codec default)
    #[serde(default)]
    pub compression_level: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflate,
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_password_sample_size() -> usize {
    10
}

fn default_timestamp_tolerance_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            password_sample_size: default_password_sample_size(),
            timestamp_tolerance_secs: default_timestamp_tolerance_secs(),
        }
    }
}

impl EngineConfig {
    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_secs(self.timestamp_tolerance_secs)
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compression_level: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

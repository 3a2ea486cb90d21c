//! Configuration System
//!
//! Loads configuration from a TOML file with per-field defaults, so a
//! partial (or absent) file always yields a runnable configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from an optional path; `None` or a missing file yields the
    /// defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}

/// Data directory layout.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("vigil"))
        .unwrap_or_else(|| PathBuf::from("./vigil_data"))
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    /// Root of the index actor's directory tree.
    pub fn index_dir(&self) -> PathBuf {
        self.dir.join("index")
    }

    /// The persisted schema registry.
    pub fn schema_path(&self) -> PathBuf {
        self.dir.join("schema.json")
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8084
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ApiConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Query pipeline tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Matches emitted per batch before an exporter pauses.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Events per chunk the archive hands out.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_batch_size() -> u64 {
    100
}

fn default_chunk_size() -> usize {
    1024
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

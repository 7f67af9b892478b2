//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the daemon: storage and
//! queue backends, worker tuning and the API listener.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Top-level daemon configuration (tempo.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Queue backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueConfig {
    /// In-memory queue (default, single process).
    #[serde(rename = "memory")]
    Memory {
        #[serde(default = "default_prefix")]
        prefix: String,
    },
    /// Redis-backed queue, shared across replicas.
    #[serde(rename = "redis")]
    Redis {
        url: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

fn default_prefix() -> String {
    "tempo".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::Memory {
            prefix: default_prefix(),
        }
    }
}

impl QueueConfig {
    /// The key prefix shared by queue state and the recovery lock.
    pub fn prefix(&self) -> &str {
        match self {
            QueueConfig::Memory { prefix } => prefix,
            QueueConfig::Redis { prefix, .. } => prefix,
        }
    }
}

/// Worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub tick_ms: u64,
    /// Maximum entries claimed per tick.
    pub claim_batch: usize,
    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            claim_batch: 16,
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// API listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7150,
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.prefix().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "queue prefix cannot be empty".into(),
            ));
        }
        if let QueueConfig::Redis { url, .. } = &self.queue {
            if url.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "redis queue requires a url".into(),
                ));
            }
        }
        if self.worker.tick_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker tick_ms cannot be zero".into(),
            ));
        }
        if self.worker.claim_batch == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker claim_batch cannot be zero".into(),
            ));
        }
        Ok(())
    }
}

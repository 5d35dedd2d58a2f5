// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::accumulator::BatchConfig;
use crate::category::CategoryRegistry;
use crate::error::ConfigError;
use crate::intake::DEFAULT_MAX_BODY_BYTES;
use crate::storage::{StorageConfig, DEFAULT_BUCKET};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8989);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Configuration for the intake server
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Categories uploads may target
    pub categories: CategoryRegistry,
    /// Release and backpressure settings, shared by every category
    pub batch: BatchConfig,
    /// Largest accepted upload body
    pub max_body_bytes: usize,
    /// Where committed batches go
    pub storage: StorageConfig,
    /// How long shutdown waits for connections and queued commits
    pub shutdown_grace: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(DEFAULT_BIND_ADDR),
            categories: CategoryRegistry::default(),
            batch: BatchConfig::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            storage: StorageConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name} has invalid value '{val}'"))),
        Err(_) => Ok(None),
    }
}

impl IntakeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<SocketAddr>("ALEXANDRIA_BIND")? {
            config.bind_addr = addr;
        }
        if let Ok(categories) = env::var("ALEXANDRIA_CATEGORIES") {
            config.categories = CategoryRegistry::new(categories.split(','));
        }
        if let Some(secs) = env_parse::<u64>("ALEXANDRIA_BATCH_DELAY_SECS")? {
            config.batch.delay_threshold = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_parse::<usize>("ALEXANDRIA_BATCH_BYTE_THRESHOLD")? {
            config.batch.byte_threshold = bytes;
        }
        if let Some(bytes) = env_parse::<usize>("ALEXANDRIA_BUFFERED_BYTE_LIMIT")? {
            config.batch.buffered_byte_limit = bytes;
        }
        if let Some(secs) = env_parse::<u64>("ALEXANDRIA_COMMIT_TIMEOUT_SECS")? {
            config.batch.commit_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_parse::<usize>("ALEXANDRIA_MAX_BODY_BYTES")? {
            config.max_body_bytes = bytes;
        }
        if let Some(secs) = env_parse::<u64>("ALEXANDRIA_SHUTDOWN_GRACE_SECS")? {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        config.storage = storage_from_env()?;
        config.log_level = env::var("ALEXANDRIA_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one category is required".to_string(),
            ));
        }
        if self.batch.delay_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "batch delay must be greater than 0".to_string(),
            ));
        }
        if self.batch.commit_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "commit timeout must be greater than 0".to_string(),
            ));
        }
        if self.batch.buffered_byte_limit == 0
            || u32::try_from(self.batch.buffered_byte_limit).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "buffered byte limit must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max body size must be greater than 0".to_string(),
            ));
        }
        if self.max_body_bytes > self.batch.buffered_byte_limit {
            return Err(ConfigError::Invalid(
                "max body size cannot exceed the buffered byte limit".to_string(),
            ));
        }
        match &self.storage {
            StorageConfig::S3 { bucket, .. } if bucket.trim().is_empty() => {
                return Err(ConfigError::Invalid("bucket cannot be empty".to_string()));
            }
            StorageConfig::Local { path } if path.as_os_str().is_empty() => {
                return Err(ConfigError::Invalid(
                    "local storage path cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }
}

fn storage_from_env() -> Result<StorageConfig, ConfigError> {
    let backend = env::var("ALEXANDRIA_STORAGE")
        .map(|val| val.trim().to_lowercase())
        .unwrap_or_else(|_| "s3".to_string());
    match backend.as_str() {
        "s3" => Ok(StorageConfig::S3 {
            bucket: env::var("ALEXANDRIA_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            region: env::var("AWS_REGION").ok(),
        }),
        "local" => {
            let path = env::var("ALEXANDRIA_STORAGE_PATH").map_err(|_| {
                ConfigError::Invalid(
                    "ALEXANDRIA_STORAGE_PATH is required for local storage".to_string(),
                )
            })?;
            Ok(StorageConfig::Local {
                path: PathBuf::from(path),
            })
        }
        "memory" => Ok(StorageConfig::InMemory),
        other => Err(ConfigError::Invalid(format!(
            "Unknown storage backend '{other}'. Must be one of: s3, local, memory"
        ))),
    }
}

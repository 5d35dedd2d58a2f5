// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use crate::ring_buffer::DEFAULT_RING_BUFFER_SIZE;
use std::env;
use std::time::Duration;

pub const DEFAULT_ARCHIVE_URL: &str = "https://alexandria.probably-not-malware.lol";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Value of `ALEXANDRIA_LOG_SUBMISSION` that turns log shipping off.
const SUBMISSION_DISABLED: &str = "disabled";

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

/// Configuration for a [`crate::WriterWrapper`] and its flush loop.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Archive base URL, e.g. `https://archive.example.com`
    pub base_url: String,
    /// Category the archive batches this stream under
    pub category: String,
    /// Caller-chosen identifier of this log stream within the category
    pub stream_id: String,
    /// How often buffered chunks are shipped. Also the deadline of each submission.
    pub flush_interval: Duration,
    /// Number of chunks kept between two flushes
    pub ring_buffer_size: usize,
    /// When false the wrapper only passes writes through
    pub enabled: bool,
}

impl WriterConfig {
    pub fn new(category: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_ARCHIVE_URL.to_string(),
            category: category.into(),
            stream_id: stream_id.into(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            enabled: true,
        }
    }

    /// Builds a configuration for the given stream, overriding defaults from
    /// `ALEXANDRIA_*` environment variables.
    pub fn from_env(
        category: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(category, stream_id);

        if let Ok(url) = env::var("ALEXANDRIA_URL") {
            config.base_url = url;
        }
        if let Some(secs) = env_parse::<u64>("ALEXANDRIA_FLUSH_INTERVAL_SECS")? {
            config.flush_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>("ALEXANDRIA_RING_BUFFER_SIZE")? {
            config.ring_buffer_size = size;
        }
        config.enabled = env::var("ALEXANDRIA_LOG_SUBMISSION")
            .map(|val| val.trim().to_lowercase() != SUBMISSION_DISABLED)
            .unwrap_or(true);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.category.trim().is_empty() {
            return Err(ConfigError::Invalid("category cannot be empty".to_string()));
        }
        if self.stream_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "stream id cannot be empty".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush interval must be greater than 0".to_string(),
            ));
        }
        if self.ring_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "ring buffer size must be greater than 0".to_string(),
            ));
        }
        if self.enabled && reqwest::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid archive URL '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors returned by [`crate::accumulator::BatchAccumulator::add`]
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AccumulatorError {
    #[error("batch accumulator for {0} is closed")]
    Closed(String),
}

/// Why a sealed batch was not written. The batch is discarded either way.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("batch has no serializable entries")]
    NothingToCommit,

    #[error("failed to upload batch to storage: {0}")]
    Storage(#[from] object_store::Error),
}

/// Errors raised while building the storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to create {backend} store: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: object_store::Error,
    },

    #[error("Failed to create storage directory '{path}': {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by [`crate::config::IntakeConfig`] loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from running the intake server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Shutdown grace period exceeded, pending batches were dropped")]
    ShutdownTimeout,
}

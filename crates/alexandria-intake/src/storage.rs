// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::StorageError;

pub const DEFAULT_BUCKET: &str = "techaro-anubis-logs";

/// Where committed batches are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// S3 or an S3-compatible service. Credentials and endpoint come from
    /// the usual `AWS_*` environment variables.
    S3 {
        bucket: String,
        region: Option<String>,
    },
    /// A directory on the local filesystem, created if missing
    Local { path: PathBuf },
    /// Process memory, lost on exit
    InMemory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::S3 {
            bucket: DEFAULT_BUCKET.to_string(),
            region: None,
        }
    }
}

impl StorageConfig {
    /// Local filesystem stores reject object attributes on put.
    #[must_use]
    pub fn supports_attributes(&self) -> bool {
        !matches!(self, StorageConfig::Local { .. })
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::S3 { .. } => "s3",
            StorageConfig::Local { .. } => "local",
            StorageConfig::InMemory => "memory",
        }
    }
}

pub fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::S3 { bucket, region } => {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = region {
                builder = builder.with_region(region);
            }
            let s3 = builder.build().map_err(|source| StorageError::Backend {
                backend: "s3",
                source,
            })?;
            debug!(bucket = %bucket, "Using S3 storage");
            Arc::new(s3)
        }
        StorageConfig::Local { path } => {
            std::fs::create_dir_all(path).map_err(|source| StorageError::Directory {
                path: path.display().to_string(),
                source,
            })?;
            let local =
                LocalFileSystem::new_with_prefix(path).map_err(|source| StorageError::Backend {
                    backend: "local",
                    source,
                })?;
            debug!(path = %path.display(), "Using local filesystem storage");
            Arc::new(local)
        }
        StorageConfig::InMemory => {
            debug!("Using in-memory storage");
            Arc::new(InMemory::new())
        }
    };
    Ok(store)
}

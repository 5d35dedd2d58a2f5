// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use object_store::{path::Path, Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entry::Batch;
use crate::error::CommitError;

pub const DEFAULT_KEY_PREFIX: &str = "logs";
pub const JSONL_CONTENT_TYPE: &str = "application/jsonl";

/// What a successful commit wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub batch_id: String,
    pub key: String,
    pub items: usize,
    pub bytes: usize,
}

/// Persists one sealed batch.
#[async_trait]
pub trait Commit: Send + Sync {
    async fn commit(&self, batch: Batch) -> Result<CommitReceipt, CommitError>;
}

/// Writes each batch as a single JSONL object in blob storage.
#[derive(Debug, Clone)]
pub struct BlobCommitter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    content_type: bool,
}

impl BlobCommitter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            content_type: true,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Skips the content type attribute, for stores that reject attributes.
    #[must_use]
    pub fn without_content_type(mut self) -> Self {
        self.content_type = false;
        self
    }

    fn object_key(&self, category: &str, batch_id: &str) -> Path {
        Path::from(format!("{}/{category}/batch-{batch_id}.jsonl", self.prefix))
    }
}

/// One compact JSON line per entry. Entries that fail to serialize are
/// skipped and counted out of the returned item count.
fn encode_jsonl(batch: &Batch) -> (Vec<u8>, usize) {
    let mut body = Vec::with_capacity(batch.byte_size + batch.len());
    let mut items = 0;
    for entry in &batch.entries {
        match serde_json::to_vec(entry) {
            Ok(line) => {
                body.extend_from_slice(&line);
                body.push(b'\n');
                items += 1;
            }
            Err(e) => {
                warn!(
                    kind = %batch.category,
                    entryID = %entry.id,
                    "Dropping log entry that failed to serialize: {e}"
                );
            }
        }
    }
    (body, items)
}

#[async_trait]
impl Commit for BlobCommitter {
    async fn commit(&self, batch: Batch) -> Result<CommitReceipt, CommitError> {
        let (body, items) = encode_jsonl(&batch);
        if items == 0 {
            return Err(CommitError::NothingToCommit);
        }

        let batch_id = Uuid::now_v7().to_string();
        let key = self.object_key(&batch.category, &batch_id);
        let bytes = body.len();

        let mut opts = PutOptions::default();
        if self.content_type {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, JSONL_CONTENT_TYPE.into());
            opts.attributes = attributes;
        }

        self.store
            .put_opts(&key, PutPayload::from(body), opts)
            .await?;

        info!(
            batchID = %batch_id,
            kind = %batch.category,
            items,
            size = bytes,
            key = %key,
            "batch committed"
        );

        Ok(CommitReceipt {
            batch_id,
            key: key.to_string(),
            items,
            bytes,
        })
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::time::Instant;
use uuid::Uuid;

/// One upload as it is stored: an opaque payload tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub category: String,
    #[serde(rename = "streamID")]
    pub stream_id: String,
    #[serde(serialize_with = "encode_payload", deserialize_with = "decode_payload")]
    pub payload: Bytes,
}

impl LogEntry {
    /// Wraps `payload` with a fresh time-ordered id.
    pub fn new(category: impl Into<String>, stream_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            category: category.into(),
            stream_id: stream_id.into(),
            payload,
        }
    }

    /// Length of the JSON line this entry is committed as, newline excluded.
    pub fn serialized_size(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|line| line.len())
    }
}

fn encode_payload<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(payload))
}

fn decode_payload<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// Ordered entries for one category on their way to storage.
#[derive(Debug)]
pub struct Batch {
    pub category: String,
    pub entries: Vec<LogEntry>,
    /// Sum of the sizes reported when each entry was added
    pub byte_size: usize,
    /// Set when the first entry lands
    pub opened_at: Option<Instant>,
    /// Buffered-byte permits held by this batch, returned once it is committed
    pub(crate) reserved: u32,
}

impl Batch {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            entries: Vec::new(),
            byte_size: 0,
            opened_at: None,
            reserved: 0,
        }
    }

    pub(crate) fn push(&mut self, entry: LogEntry, size: usize, permits: u32) {
        if self.entries.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.entries.push(entry);
        self.byte_size += size;
        self.reserved += permits;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_shape() {
        let entry = LogEntry {
            id: "0192a0b4-0000-7000-8000-000000000000".to_string(),
            category: "techaro.anubis".to_string(),
            stream_id: "instance-1".to_string(),
            payload: Bytes::from_static(b"hello\n"),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"id":"0192a0b4-0000-7000-8000-000000000000","category":"techaro.anubis","streamID":"instance-1","payload":"aGVsbG8K"}"#
        );
        assert_eq!(entry.serialized_size().unwrap(), json.len());
    }

    #[test]
    fn test_entry_parses_committed_line() {
        let line = r#"{"id":"x","category":"techaro.thoth","streamID":"s","payload":"AAH/"}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.stream_id, "s");
        assert_eq!(&entry.payload[..], b"\x00\x01\xff");
    }

    #[test]
    fn test_entry_rejects_bad_base64() {
        let line = r#"{"id":"x","category":"c","streamID":"s","payload":"not base64!"}"#;
        assert!(serde_json::from_str::<LogEntry>(line).is_err());
    }

    #[test]
    fn test_new_ids_are_unique_v7() {
        let first = LogEntry::new("c", "s", Bytes::new());
        let second = LogEntry::new("c", "s", Bytes::new());
        assert_ne!(first.id, second.id);
        let id = Uuid::parse_str(&first.id).unwrap();
        assert_eq!(id.get_version_num(), 7);
    }

    #[tokio::test]
    async fn test_batch_records_open_time_on_first_push() {
        let mut batch = Batch::new("c");
        assert!(batch.opened_at.is_none());

        batch.push(LogEntry::new("c", "s", Bytes::from_static(b"a")), 40, 40);
        let opened_at = batch.opened_at.unwrap();
        batch.push(LogEntry::new("c", "s", Bytes::from_static(b"b")), 30, 30);

        assert_eq!(batch.opened_at, Some(opened_at));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.byte_size, 70);
        assert_eq!(batch.reserved, 70);
    }
}

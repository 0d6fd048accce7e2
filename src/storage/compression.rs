//! Reversible, self-describing record compression
//!
//! A compressed record is an envelope: the partition's primary-key and indexed
//! fields stay in clear so the structured store can index it, and the full
//! original record travels as a zstd-compressed, base64-encoded JSON payload.

use crate::storage::{Partition, StorageError, StorageResult};
use base64::prelude::*;
use serde_json::{Map, Value};

pub const COMPRESSED_MARKER: &str = "_compressed";
const ORIGINAL_SIZE: &str = "_originalSize";
const COMPRESSED_SIZE: &str = "_compressedSize";
const PAYLOAD: &str = "_payload";

#[derive(Debug, Clone, Copy)]
pub struct Codec {
    level: i32,
}

impl Default for Codec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl Codec {
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }

    pub fn is_compressed(record: &Value) -> bool {
        record
            .get(COMPRESSED_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn compress(&self, partition: Partition, record: &Value) -> StorageResult<Value> {
        if Self::is_compressed(record) {
            return Ok(record.clone());
        }

        let raw = serde_json::to_vec(record)?;
        let packed = zstd::encode_all(raw.as_slice(), self.level)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        let encoded = BASE64_STANDARD.encode(&packed);

        let mut envelope = Map::new();
        let mut clear_fields = vec![partition.primary_key_field()];
        clear_fields.extend(partition.index_columns().iter().map(|(_, field)| *field));
        for field in clear_fields {
            if let Some(value) = record.get(field) {
                envelope.insert(field.to_string(), value.clone());
            }
        }

        envelope.insert(COMPRESSED_MARKER.to_string(), Value::Bool(true));
        envelope.insert(ORIGINAL_SIZE.to_string(), Value::from(raw.len() as u64));
        envelope.insert(COMPRESSED_SIZE.to_string(), Value::from(packed.len() as u64));
        envelope.insert(PAYLOAD.to_string(), Value::String(encoded));

        Ok(Value::Object(envelope))
    }

    /// Restore the original record; records without the marker pass through
    pub fn decompress(record: &Value) -> StorageResult<Value> {
        if !Self::is_compressed(record) {
            return Ok(record.clone());
        }

        let encoded = record
            .get(PAYLOAD)
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::Compression("missing payload".to_string()))?;
        let packed = BASE64_STANDARD
            .decode(encoded)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        let raw = zstd::decode_all(packed.as_slice())
            .map_err(|e| StorageError::Compression(e.to_string()))?;

        if let Some(expected) = record.get(ORIGINAL_SIZE).and_then(Value::as_u64) {
            if expected != raw.len() as u64 {
                return Err(StorageError::Compression(format!(
                    "size mismatch: expected {expected} bytes, got {}",
                    raw.len()
                )));
            }
        }

        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_url() -> Value {
        json!({
            "id": 1700000000000i64,
            "originalUrl": "https://example.com/a/very/long/path?with=query&and=more",
            "shortCode": "abc123",
            "createdAt": 1700000000000i64,
            "clicks": 3,
            "clickHistory": [
                {"timestamp": 1, "userAgent": "curl/8", "referrer": null},
                {"timestamp": 2, "userAgent": "curl/8", "referrer": "https://news.ycombinator.com"}
            ],
            "isActive": true
        })
    }

    #[test]
    fn test_envelope_keeps_indexed_fields_in_clear() {
        let codec = Codec::default();
        let packed = codec.compress(Partition::Urls, &sample_url()).unwrap();

        assert!(Codec::is_compressed(&packed));
        assert_eq!(packed["id"], json!(1700000000000i64));
        assert_eq!(packed["shortCode"], json!("abc123"));
        assert_eq!(packed["clicks"], json!(3));
        assert!(packed.get("originalUrl").is_none());
        assert!(packed[ORIGINAL_SIZE].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_decompress_strips_bookkeeping() {
        let codec = Codec::new(19);
        let original = sample_url();
        let restored = Codec::decompress(&codec.compress(Partition::Urls, &original).unwrap()).unwrap();

        assert_eq!(restored, original);
        assert!(restored.get(COMPRESSED_MARKER).is_none());
    }

    #[test]
    fn test_uncompressed_records_pass_through() {
        let plain = json!({"key": "theme", "value": "dark", "timestamp": 5});
        assert_eq!(Codec::decompress(&plain).unwrap(), plain);
    }

    #[test]
    fn test_compress_is_idempotent() {
        let codec = Codec::default();
        let once = codec.compress(Partition::Urls, &sample_url()).unwrap();
        let twice = codec.compress(Partition::Urls, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_corrupt_payload_is_rejected() {
        let mut packed = Codec::default()
            .compress(Partition::Urls, &sample_url())
            .unwrap();
        packed[PAYLOAD] = json!("not base64!!");
        assert!(matches!(
            Codec::decompress(&packed),
            Err(StorageError::Compression(_))
        ));
    }
}

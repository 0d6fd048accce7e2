use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error("flat store quota exceeded ({needed} bytes needed, {limit} allowed)")]
    QuotaExceeded { needed: u64, limit: u64 },
    #[error("invalid compressed record: {0}")]
    Compression(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Logical collection inside every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Urls,
    Analytics,
    Security,
    Settings,
    Cache,
}

impl Partition {
    pub const ALL: [Partition; 5] = [
        Partition::Urls,
        Partition::Analytics,
        Partition::Security,
        Partition::Settings,
        Partition::Cache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Urls => "urls",
            Partition::Analytics => "analytics",
            Partition::Security => "security",
            Partition::Settings => "settings",
            Partition::Cache => "cache",
        }
    }

    /// Prefix used for composite keys in the flat store and memory cache.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Partition::Settings => "setting",
            other => other.as_str(),
        }
    }

    /// JSON field holding the primary key.
    pub fn primary_key_field(&self) -> &'static str {
        match self {
            Partition::Urls | Partition::Security => "id",
            Partition::Analytics => "urlId",
            Partition::Settings | Partition::Cache => "key",
        }
    }

    /// Whether the primary key is numeric in the structured store.
    pub fn integer_key(&self) -> bool {
        matches!(self, Partition::Urls | Partition::Security)
    }

    /// Secondary index columns as `(column, json field)` pairs.
    pub fn index_columns(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Partition::Urls => &[
                ("short_code", "shortCode"),
                ("created_at", "createdAt"),
                ("clicks", "clicks"),
            ],
            Partition::Analytics => &[("timestamp", "timestamp")],
            Partition::Security => &[("timestamp", "timestamp"), ("type", "type")],
            Partition::Settings => &[],
            Partition::Cache => &[("timestamp", "timestamp"), ("expiry", "expiry")],
        }
    }

    /// Primary-key column name in the structured store.
    pub fn key_column(&self) -> &'static str {
        match self {
            Partition::Urls | Partition::Security => "id",
            Partition::Analytics => "url_id",
            Partition::Settings | Partition::Cache => "key",
        }
    }

    pub fn composite_key(&self, key: &str) -> String {
        format!("{}_{}", self.key_prefix(), key)
    }

    /// Extract the primary key of a (possibly compressed) record.
    pub fn primary_key_of(&self, record: &Value) -> Option<String> {
        match record.get(self.primary_key_field())? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Partition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Partition::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown partition '{s}'"))
    }
}

/// One storage tier. Records are raw JSON values, possibly in compressed form.
#[async_trait]
pub trait Tier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up a record by primary key
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>>;

    /// Insert or replace a record by primary key
    async fn put(&self, partition: Partition, key: &str, record: &Value) -> Result<()>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, partition: Partition, key: &str) -> Result<bool>;

    /// Every record of a partition
    async fn scan_all(&self, partition: Partition) -> Result<Vec<Value>>;
}

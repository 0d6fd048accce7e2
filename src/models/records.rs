use crate::models::PartitionRecord;
use crate::storage::Partition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingEntry {
    pub key: String,
    pub value: Value,
    pub timestamp: i64,
}

impl PartitionRecord for SettingEntry {
    const PARTITION: Partition = Partition::Settings;

    fn primary_key(&self) -> String {
        self.key.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLogEntry {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Value,
}

impl PartitionRecord for SecurityLogEntry {
    const PARTITION: Partition = Partition::Security;

    fn primary_key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    pub timestamp: i64,
    /// Absolute expiry, epoch milliseconds
    pub expiry: i64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }
}

impl PartitionRecord for CacheEntry {
    const PARTITION: Partition = Partition::Cache;

    fn primary_key(&self) -> String {
        self.key.clone()
    }
}

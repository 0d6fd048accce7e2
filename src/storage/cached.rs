use crate::storage::{Partition, Tier};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::time::Duration;

/// Volatile read cache in front of the durable tiers (Moka cache).
///
/// Keys are composite (`<partition>_<primaryKey>`) and values are stored in the same
/// representation the durable tiers hold, compressed or not. Bounded by entry count,
/// with an optional time-to-live; losing it only costs latency.
pub struct MemoryTier {
    cache: Cache<String, Value>,
}

impl MemoryTier {
    pub fn new(max_entries: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(max_entries);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            cache: builder.build(),
        }
    }

    pub async fn insert_raw(&self, composite_key: String, record: Value) {
        self.cache.insert(composite_key, record).await;
    }

    pub async fn invalidate(&self, partition: Partition, key: &str) {
        self.cache.invalidate(&partition.composite_key(key)).await;
    }

    pub async fn clear_partition(&self, partition: Partition) {
        let prefix = format!("{}_", partition.key_prefix());
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        for key in keys {
            self.cache.invalidate(&key).await;
        }
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Entry count after pending evictions have been applied
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>> {
        Ok(self.cache.get(&partition.composite_key(key)).await)
    }

    async fn put(&self, partition: Partition, key: &str, record: &Value) -> Result<()> {
        self.cache
            .insert(partition.composite_key(key), record.clone())
            .await;
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<bool> {
        Ok(self
            .cache
            .remove(&partition.composite_key(key))
            .await
            .is_some())
    }

    async fn scan_all(&self, partition: Partition) -> Result<Vec<Value>> {
        let prefix = format!("{}_", partition.key_prefix());
        Ok(self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_capacity_bounds_entries() {
        let tier = MemoryTier::new(10, None);
        for i in 0..100 {
            tier.put(Partition::Urls, &i.to_string(), &json!({ "id": i }))
                .await
                .unwrap();
        }

        assert!(tier.entry_count().await <= 10);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let tier = MemoryTier::new(100, None);
        tier.put(Partition::Cache, "a", &json!({"key": "a"})).await.unwrap();
        tier.put(Partition::Cache, "b", &json!({"key": "b"})).await.unwrap();

        assert!(tier.delete(Partition::Cache, "a").await.unwrap());
        assert!(tier.get(Partition::Cache, "a").await.unwrap().is_none());
        assert_eq!(tier.scan_all(Partition::Cache).await.unwrap().len(), 1);

        tier.clear().await;
        assert_eq!(tier.entry_count().await, 0);
    }
}

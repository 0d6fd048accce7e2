use crate::config::{Config, StorageConfig};
use crate::models::{
    now_millis, next_record_id, CacheEntry, PartitionRecord, SecurityLogEntry, SettingEntry,
};
use crate::storage::compression::Codec;
use crate::storage::flat::{open_flat_store, FlatStore, FlatTier};
use crate::storage::quota::{DataDirQuota, NoQuota, QuotaEstimate, QuotaEstimator};
use crate::storage::{MemoryTier, Partition, SqliteStore, StorageResult, Tier};
use anyhow::Result;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Setting that drives the process-wide compression toggle
pub const COMPRESSION_SETTING: &str = "compressionEnabled";

#[derive(Default)]
struct ManagerState {
    initialized: bool,
    structured: Option<Arc<SqliteStore>>,
    quota: Option<QuotaEstimate>,
}

/// Tiered storage and cache manager.
///
/// Writes go through every available tier (structured store, flat store, memory
/// cache, in that order). Reads walk memory → structured → flat and promote
/// hits into memory. Public operations never return errors: failures are logged
/// and reported as `false`, `None`, zero counts or error lists.
pub struct StorageManager {
    pub(crate) config: StorageConfig,
    pub(crate) codec: Codec,
    compression: AtomicBool,
    pub(crate) memory: MemoryTier,
    pub(crate) flat: FlatTier,
    quota_estimator: Arc<dyn QuotaEstimator>,
    state: RwLock<ManagerState>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl StorageManager {
    pub fn new(config: StorageConfig, flat_store: Arc<dyn FlatStore>) -> Self {
        let quota_estimator: Arc<dyn QuotaEstimator> = match &config.quota_dir {
            Some(dir) => Arc::new(DataDirQuota::new(dir.clone(), config.quota_bytes)),
            None => Arc::new(NoQuota),
        };

        Self {
            codec: Codec::new(config.compression_level),
            compression: AtomicBool::new(false),
            memory: MemoryTier::new(
                config.memory_cache_capacity,
                config.memory_cache_ttl_secs.map(Duration::from_secs),
            ),
            flat: FlatTier::new(flat_store),
            quota_estimator,
            state: RwLock::new(ManagerState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Manager over the configured flat store, not yet initialized
    pub fn from_config(config: &Config) -> Result<Self> {
        let flat_store = open_flat_store(&config.flat_store)?;
        Ok(Self::new(config.storage.clone(), flat_store))
    }

    pub fn with_quota_estimator(mut self, estimator: Arc<dyn QuotaEstimator>) -> Self {
        self.quota_estimator = estimator;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Open the structured store and warm the memory cache.
    ///
    /// Idempotent. A structured store that cannot be opened leaves the manager
    /// running on the flat store alone; initialization itself never fails.
    pub async fn init(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.state.read().initialized {
            return;
        }

        let structured = match &self.config.database_url {
            Some(url) => match open_structured(url, self.config.max_connections).await {
                Ok(store) => {
                    info!("Structured store opened: {}", url);
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!(error = %e, "structured store unavailable, using flat store only");
                    None
                }
            },
            None => {
                info!("No structured store configured, using flat store only");
                None
            }
        };

        let quota = self.quota_estimator.estimate();
        let rehydrated = self.rehydrate_cache().await;

        {
            let mut state = self.state.write();
            state.structured = structured;
            state.quota = quota;
            state.initialized = true;
        }
        debug!(rehydrated, "storage manager initialized");
    }

    async fn rehydrate_cache(&self) -> usize {
        let keys = match self.flat.partition_keys(Partition::Cache) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to list flat cache entries");
                return 0;
            }
        };

        let mut loaded = 0;
        for key in keys {
            let raw = match self.flat.store().get_item(&key) {
                Ok(Some(raw)) => raw,
                _ => continue,
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    self.memory.insert_raw(key, value).await;
                    loaded += 1;
                }
                Err(e) => debug!(key = %key, error = %e, "skipping unreadable cache entry"),
            }
        }
        loaded
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Capability probe, taken once per operation
    pub(crate) fn structured(&self) -> Option<Arc<SqliteStore>> {
        self.state.read().structured.clone()
    }

    pub fn is_structured_available(&self) -> bool {
        self.structured().is_some()
    }

    pub fn quota_estimate(&self) -> Option<QuotaEstimate> {
        self.state.read().quota
    }

    pub fn set_compression_enabled(&self, enabled: bool) {
        self.compression.store(enabled, Ordering::SeqCst);
    }

    pub fn is_compression_enabled(&self) -> bool {
        self.compression.load(Ordering::SeqCst)
    }

    /// Apply persisted settings that shape storage behaviour
    pub async fn load_settings(&self) {
        let enabled = self.get_setting(COMPRESSION_SETTING, false).await;
        self.set_compression_enabled(enabled);
        debug!(compression = enabled, "storage settings loaded");
    }

    /// Compressed representation when compression is on, identity otherwise
    pub fn compress_record(&self, partition: Partition, record: &Value) -> StorageResult<Value> {
        if self.is_compression_enabled() {
            self.codec.compress(partition, record)
        } else {
            Ok(record.clone())
        }
    }

    pub fn decompress_record(&self, record: &Value) -> StorageResult<Value> {
        Codec::decompress(record)
    }

    // Raw tier walks

    pub(crate) async fn save_value(&self, partition: Partition, key: &str, record: Value) -> Result<()> {
        let stored = self.compress_record(partition, &record)?;
        self.put_stored(partition, key, &stored).await
    }

    /// Write an already-encoded record to every tier
    pub(crate) async fn put_stored(&self, partition: Partition, key: &str, stored: &Value) -> Result<()> {
        let structured = self.structured();
        let mut tiers: Vec<&dyn Tier> = Vec::with_capacity(3);
        if let Some(store) = structured.as_deref() {
            tiers.push(store);
        }
        tiers.push(&self.flat);
        tiers.push(&self.memory);

        for tier in tiers {
            if let Err(e) = tier.put(partition, key, stored).await {
                // Tiers written before the failure hold the new value; drop the
                // stale memory copy so reads fall through to them
                self.memory.invalidate(partition, key).await;
                return Err(e.context(format!(
                    "{} tier rejected {}",
                    tier.name(),
                    partition.composite_key(key)
                )));
            }
        }
        Ok(())
    }

    async fn get_value(&self, partition: Partition, key: &str) -> Result<Option<Value>> {
        if let Some(hit) = self.memory.get(partition, key).await? {
            match Codec::decompress(&hit) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!(partition = %partition, key, error = %e, "undecodable memory entry dropped");
                    self.memory.invalidate(partition, key).await;
                }
            }
        }

        let structured = self.structured();
        let mut tiers: Vec<&dyn Tier> = Vec::with_capacity(2);
        if let Some(store) = structured.as_deref() {
            tiers.push(store);
        }
        tiers.push(&self.flat);

        for tier in tiers {
            match tier.get(partition, key).await {
                Ok(Some(hit)) => {
                    self.memory.put(partition, key, &hit).await?;
                    return Ok(Some(Codec::decompress(&hit)?));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = tier.name(), partition = %partition, key, error = %e, "tier read failed");
                }
            }
        }
        Ok(None)
    }

    /// Stored (possibly compressed) records of a partition, cached one by one
    pub(crate) async fn raw_values(&self, partition: Partition) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        if let Some(store) = self.structured() {
            match store.scan_all(partition).await {
                Ok(found) => records = found,
                Err(e) => warn!(partition = %partition, error = %e, "structured scan failed"),
            }
        }

        if records.is_empty() {
            records = self.flat.scan_all(partition).await?;
        }

        for record in &records {
            if let Some(key) = partition.primary_key_of(record) {
                self.memory.put(partition, &key, record).await?;
            }
        }
        Ok(records)
    }

    /// Remove a key from the flat store and memory cache after a structured range delete
    pub(crate) async fn evict_mirrors(&self, partition: Partition, key: &str) {
        if let Err(e) = self.flat.delete(partition, key).await {
            warn!(partition = %partition, key, error = %e, "failed to evict flat entry");
        }
        self.memory.invalidate(partition, key).await;
    }

    // Typed records

    pub async fn save_record<R: PartitionRecord>(&self, record: &R) -> bool {
        let key = record.primary_key();
        let result = match serde_json::to_value(record) {
            Ok(value) => self.save_value(R::PARTITION, &key, value).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(partition = %R::PARTITION, key = %key, error = %e, "failed to save record");
                false
            }
        }
    }

    pub async fn get_record<R: PartitionRecord>(&self, key: &str) -> Option<R> {
        match self.get_value(R::PARTITION, key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(partition = %R::PARTITION, key, error = %e, "stored record does not match its type");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!(partition = %R::PARTITION, key, error = %e, "failed to read record");
                None
            }
        }
    }

    pub async fn get_all_records<R: PartitionRecord>(&self) -> Vec<R> {
        let raw = match self.raw_values(R::PARTITION).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(partition = %R::PARTITION, error = %e, "failed to scan partition");
                return Vec::new();
            }
        };

        raw.iter()
            .filter_map(|stored| {
                let value = Codec::decompress(stored)
                    .map_err(|e| warn!(partition = %R::PARTITION, error = %e, "undecodable record skipped"))
                    .ok()?;
                serde_json::from_value(value)
                    .map_err(|e| warn!(partition = %R::PARTITION, error = %e, "mistyped record skipped"))
                    .ok()
            })
            .collect()
    }

    pub async fn delete_record(&self, partition: Partition, key: &str) -> bool {
        let structured = self.structured();
        let mut tiers: Vec<&dyn Tier> = Vec::with_capacity(3);
        if let Some(store) = structured.as_deref() {
            tiers.push(store);
        }
        tiers.push(&self.flat);
        tiers.push(&self.memory);

        let mut existed = false;
        for tier in tiers {
            match tier.delete(partition, key).await {
                Ok(found) => existed |= found,
                Err(e) => {
                    error!(tier = tier.name(), partition = %partition, key, error = %e, "failed to delete record");
                    return false;
                }
            }
        }
        existed
    }

    /// Drop every record of a partition from all tiers
    pub async fn clear_partition(&self, partition: Partition) -> bool {
        if let Some(store) = self.structured() {
            if let Err(e) = store.clear(partition).await {
                error!(partition = %partition, error = %e, "failed to clear structured partition");
                return false;
            }
        }

        let keys = match self.flat.partition_keys(partition) {
            Ok(keys) => keys,
            Err(e) => {
                error!(partition = %partition, error = %e, "failed to list flat entries");
                return false;
            }
        };
        for key in keys {
            if let Err(e) = self.flat.store().remove_item(&key) {
                error!(key = %key, error = %e, "failed to remove flat entry");
                return false;
            }
        }

        self.memory.clear_partition(partition).await;
        info!(partition = %partition, "partition cleared");
        true
    }

    // Settings

    pub async fn save_setting<T: Serialize>(&self, key: &str, value: T) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                error!(key, error = %e, "setting is not serializable");
                return false;
            }
        };

        self.save_record(&SettingEntry {
            key: key.to_string(),
            value,
            timestamp: now_millis(),
        })
        .await
    }

    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_record::<SettingEntry>(key)
            .await
            .and_then(|entry| serde_json::from_value(entry.value).ok())
            .unwrap_or(default)
    }

    pub async fn get_all_settings(&self) -> BTreeMap<String, Value> {
        self.get_all_records::<SettingEntry>()
            .await
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect()
    }

    // Security log

    pub async fn log_security_event(&self, kind: &str, payload: Value) -> bool {
        self.save_record(&SecurityLogEntry {
            id: next_record_id(),
            kind: kind.to_string(),
            timestamp: now_millis(),
            payload,
        })
        .await
    }

    /// Security log, most recent first
    pub async fn get_security_logs(&self) -> Vec<SecurityLogEntry> {
        let mut logs = self.get_all_records::<SecurityLogEntry>().await;
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        logs
    }

    // Cache entries

    /// Store a value under `key` for `ttl` (the configured default when `None`)
    pub async fn set_cache<T: Serialize>(&self, key: &str, data: T, ttl: Option<Duration>) -> bool {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                error!(key, error = %e, "cache value is not serializable");
                return false;
            }
        };

        let ttl = ttl.unwrap_or_else(|| Duration::from_secs(self.config.cache_ttl_secs));
        let now = now_millis();
        self.save_record(&CacheEntry {
            key: key.to_string(),
            data,
            timestamp: now,
            expiry: now.saturating_add(ttl.as_millis() as i64),
        })
        .await
    }

    /// Fresh cached value, evicting the entry if it has gone stale
    pub async fn get_cache<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.get_record::<CacheEntry>(key).await?;
        if entry.is_expired(now_millis()) {
            debug!(key, "evicting stale cache entry");
            self.delete_record(Partition::Cache, key).await;
            return None;
        }
        serde_json::from_value(entry.data).ok()
    }

    /// Close the structured store and drop the memory cache. Idempotent.
    pub async fn destroy(&self) {
        let _guard = self.lifecycle.lock().await;
        let structured = {
            let mut state = self.state.write();
            if !state.initialized && state.structured.is_none() {
                return;
            }
            state.initialized = false;
            state.quota = None;
            state.structured.take()
        };

        if let Some(store) = structured {
            store.close().await;
        }
        self.memory.clear().await;
        info!("storage manager destroyed");
    }
}

async fn open_structured(url: &str, max_connections: u32) -> Result<SqliteStore> {
    let store = SqliteStore::new(url, max_connections).await?;
    store.init().await?;
    Ok(store)
}

//! Flat fallback store
//!
//! A synchronous string key-value store with no query capability. It receives a
//! mirror of every write and becomes the only durable backend when the structured
//! store cannot be opened.

use crate::config::FlatStoreConfig;
use crate::storage::{Partition, StorageError, Tier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait FlatStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    /// Sum of key and value lengths over every entry
    fn footprint_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        for key in self.keys()? {
            let value_len = self.get_item(&key)?.map(|v| v.len()).unwrap_or(0);
            total += (key.len() + value_len) as u64;
        }
        Ok(total)
    }
}

/// Process-lifetime flat store, used by tests and when no path is configured
#[derive(Default)]
pub struct MemoryFlatStore {
    entries: DashMap<String, String>,
}

impl MemoryFlatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlatStore for MemoryFlatStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    fn footprint_bytes(&self) -> Result<u64> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().len() + entry.value().len()) as u64)
            .sum())
    }
}

/// Flat store persisted as a single JSON object on disk, rewritten on every change.
///
/// An optional byte quota mimics the hard limit browsers place on this kind of
/// storage: a write that would push the footprint over it fails with
/// [`StorageError::QuotaExceeded`] and leaves the store untouched.
pub struct FileFlatStore {
    path: PathBuf,
    max_bytes: Option<u64>,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileFlatStore {
    pub fn open(path: impl AsRef<Path>, max_bytes: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read flat store {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt flat store {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            max_bytes,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn footprint(entries: &BTreeMap<String, String>) -> u64 {
    entries.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum()
}

impl FlatStore for FileFlatStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();

        if let Some(limit) = self.max_bytes {
            let current = footprint(&entries);
            let replaced = entries.get(key).map(|v| (key.len() + v.len()) as u64).unwrap_or(0);
            let needed = current - replaced + (key.len() + value.len()) as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit }.into());
            }
        }

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn footprint_bytes(&self) -> Result<u64> {
        Ok(footprint(&self.entries.read()))
    }
}

/// Flat store described by configuration: a JSON file when a path is set,
/// process memory otherwise
pub fn open_flat_store(config: &FlatStoreConfig) -> Result<Arc<dyn FlatStore>> {
    match &config.path {
        Some(path) => Ok(Arc::new(FileFlatStore::open(path, config.max_bytes)?)),
        None => Ok(Arc::new(MemoryFlatStore::new())),
    }
}

/// Puts a [`FlatStore`] behind the tier interface using composite keys
pub struct FlatTier {
    store: Arc<dyn FlatStore>,
}

impl FlatTier {
    pub fn new(store: Arc<dyn FlatStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FlatStore> {
        &self.store
    }

    /// Keys of one partition, with the composite prefix
    pub fn partition_keys(&self, partition: Partition) -> Result<Vec<String>> {
        let prefix = format!("{}_", partition.key_prefix());
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect())
    }
}

#[async_trait]
impl Tier for FlatTier {
    fn name(&self) -> &'static str {
        "flat"
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>> {
        self.store
            .get_item(&partition.composite_key(key))?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    async fn put(&self, partition: Partition, key: &str, record: &Value) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set_item(&partition.composite_key(key), &raw)
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<bool> {
        let composite = partition.composite_key(key);
        let existed = self.store.get_item(&composite)?.is_some();
        self.store.remove_item(&composite)?;
        Ok(existed)
    }

    async fn scan_all(&self, partition: Partition) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for key in self.partition_keys(partition)? {
            let Some(raw) = self.store.get_item(&key)? else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable flat entry"),
            }
        }
        Ok(records)
    }
}

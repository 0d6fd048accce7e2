//! Expiry, retention, optimisation and statistics routines of the manager

use crate::models::now_millis;
use crate::storage::compression::Codec;
use crate::storage::quota::QuotaEstimate;
use crate::storage::{Partition, StorageManager, Tier};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Record count per partition, zero when a partition cannot be counted
    pub partitions: BTreeMap<String, u64>,
    /// Key plus value length over every flat-store entry
    pub fallback_bytes: u64,
    pub memory_entries: u64,
    pub quota: Option<QuotaEstimate>,
    pub structured_available: bool,
    pub compression_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResult {
    pub cache_cleared: u64,
    pub logs_removed: u64,
    pub recompressed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_cache_cleared: u64,
    pub security_logs_pruned: u64,
    pub optimization: Option<OptimizeResult>,
}

impl StorageManager {
    /// Delete cache entries whose expiry has passed, via the expiry index.
    ///
    /// Works on the structured store only; other partitions are never touched.
    pub async fn clear_expired_cache(&self) -> u64 {
        let Some(store) = self.structured() else {
            debug!("structured store unavailable, skipping cache expiry sweep");
            return 0;
        };

        match store.delete_expired_cache(now_millis()).await {
            Ok(keys) => {
                for key in &keys {
                    self.evict_mirrors(Partition::Cache, key).await;
                }
                if !keys.is_empty() {
                    info!(removed = keys.len(), "expired cache entries cleared");
                }
                keys.len() as u64
            }
            Err(e) => {
                error!(error = %e, "failed to clear expired cache entries");
                0
            }
        }
    }

    /// Age-based retention of the security log
    pub async fn prune_security_logs(&self) -> u64 {
        let retention = self
            .config
            .security_log_retention_days
            .saturating_mul(DAY_MS);
        let cutoff = now_millis().saturating_sub(retention);

        let removed = match self.structured() {
            Some(store) => store.delete_security_before(cutoff).await,
            None => self.flat_security_entries().await.map(|entries| {
                entries
                    .into_iter()
                    .filter(|(_, timestamp)| *timestamp < cutoff)
                    .map(|(id, _)| id)
                    .collect()
            }),
        };

        match removed {
            Ok(ids) => {
                self.evict_security_ids(&ids).await;
                if !ids.is_empty() {
                    info!(removed = ids.len(), "aged security log entries pruned");
                }
                ids.len() as u64
            }
            Err(e) => {
                error!(error = %e, "failed to prune security log");
                0
            }
        }
    }

    /// Count-based retention: keep the `max_entries` most recent log entries
    pub async fn trim_security_logs(&self, max_entries: u64) -> u64 {
        let removed = match self.structured() {
            Some(store) => store.trim_security(max_entries).await,
            None => self.flat_security_entries().await.map(|mut entries| {
                entries.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
                entries
                    .into_iter()
                    .skip(usize::try_from(max_entries).unwrap_or(usize::MAX))
                    .map(|(id, _)| id)
                    .collect()
            }),
        };

        match removed {
            Ok(ids) => {
                self.evict_security_ids(&ids).await;
                if !ids.is_empty() {
                    info!(removed = ids.len(), max_entries, "security log trimmed");
                }
                ids.len() as u64
            }
            Err(e) => {
                error!(error = %e, "failed to trim security log");
                0
            }
        }
    }

    /// `(id, timestamp)` of every security entry held by the flat store
    async fn flat_security_entries(&self) -> Result<Vec<(i64, i64)>> {
        let records = self.flat.scan_all(Partition::Security).await?;
        Ok(records
            .iter()
            .filter_map(|record| {
                let id = record.get("id").and_then(Value::as_i64)?;
                let timestamp = record.get("timestamp").and_then(Value::as_i64)?;
                Some((id, timestamp))
            })
            .collect())
    }

    async fn evict_security_ids(&self, ids: &[i64]) {
        for id in ids {
            self.evict_mirrors(Partition::Security, &id.to_string()).await;
        }
    }

    /// Re-save every stored link that predates compression being switched on
    async fn recompress_urls(&self) -> Result<u64> {
        if !self.is_compression_enabled() {
            return Ok(0);
        }

        let mut recompressed = 0;
        for stored in self.raw_values(Partition::Urls).await? {
            if Codec::is_compressed(&stored) {
                continue;
            }
            let Some(key) = Partition::Urls.primary_key_of(&stored) else {
                continue;
            };
            self.save_value(Partition::Urls, &key, stored).await?;
            recompressed += 1;
        }
        Ok(recompressed)
    }

    pub async fn optimize_storage(&self) -> Option<OptimizeResult> {
        let cache_cleared = self.clear_expired_cache().await;
        let logs_removed = self
            .trim_security_logs(self.config.security_log_max_entries)
            .await;

        match self.recompress_urls().await {
            Ok(recompressed) => {
                let result = OptimizeResult {
                    cache_cleared,
                    logs_removed,
                    recompressed,
                };
                info!(?result, "storage optimized");
                Some(result)
            }
            Err(e) => {
                error!(error = %e, "storage optimization failed");
                None
            }
        }
    }

    pub async fn get_storage_stats(&self) -> StorageStats {
        let structured = self.structured();
        let mut partitions = BTreeMap::new();

        for partition in Partition::ALL {
            let count = match &structured {
                Some(store) => store.count(partition).await,
                None => self
                    .flat
                    .partition_keys(partition)
                    .map(|keys| keys.len() as u64),
            };
            let count = count.unwrap_or_else(|e| {
                warn!(partition = %partition, error = %e, "failed to count partition");
                0
            });
            partitions.insert(partition.as_str().to_string(), count);
        }

        let fallback_bytes = self.flat.store().footprint_bytes().unwrap_or_else(|e| {
            warn!(error = %e, "failed to measure flat store");
            0
        });

        StorageStats {
            partitions,
            fallback_bytes,
            memory_entries: self.memory.entry_count().await,
            quota: self.quota_estimate(),
            structured_available: structured.is_some(),
            compression_enabled: self.is_compression_enabled(),
        }
    }

    /// Scheduled housekeeping: expiry, retention and optimisation
    pub async fn perform_maintenance(&self) -> MaintenanceReport {
        let expired_cache_cleared = self.clear_expired_cache().await;
        let security_logs_pruned = self.prune_security_logs().await;
        let optimization = self.optimize_storage().await;

        let report = MaintenanceReport {
            expired_cache_cleared,
            security_logs_pruned,
            optimization,
        };
        debug!(?report, "maintenance complete");
        report
    }
}

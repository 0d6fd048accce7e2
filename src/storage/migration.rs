//! Import of flat-store data written under the pre-partition naming scheme

use crate::models::UrlRecord;
use crate::storage::StorageManager;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyTarget {
    /// A JSON array of link records
    UrlList,
    /// A single value that becomes the named setting
    Setting(&'static str),
}

pub const LEGACY_KEYS: &[(&str, LegacyTarget)] = &[
    ("shortenedUrls", LegacyTarget::UrlList),
    ("urlShortener_urls", LegacyTarget::UrlList),
    ("rateLimitData", LegacyTarget::Setting("rateLimit")),
    ("securityStats", LegacyTarget::Setting("securityStats")),
];

impl StorageManager {
    /// Move legacy flat-store keys into their partitions.
    ///
    /// A legacy key is removed once every item under it has been migrated, so a
    /// second run finds nothing to do. Links that already exist are left as they
    /// are. Returns the number of items migrated.
    pub async fn migrate_legacy_data(&self) -> u64 {
        let mut migrated = 0;

        for (legacy_key, target) in LEGACY_KEYS {
            let raw = match self.flat.store().get_item(legacy_key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = legacy_key, error = %e, "failed to read legacy key");
                    continue;
                }
            };

            let value: Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key = legacy_key, error = %e, "legacy key is not valid JSON, leaving it in place");
                    continue;
                }
            };

            let (count, complete) = match target {
                LegacyTarget::UrlList => self.migrate_url_list(legacy_key, value).await,
                LegacyTarget::Setting(name) => {
                    if self.save_setting(name, value).await {
                        (1, true)
                    } else {
                        (0, false)
                    }
                }
            };
            migrated += count;

            if complete {
                if let Err(e) = self.flat.store().remove_item(legacy_key) {
                    warn!(key = legacy_key, error = %e, "failed to remove migrated legacy key");
                }
            }
        }

        if migrated > 0 {
            info!(migrated, "legacy data migrated");
        }
        migrated
    }

    async fn migrate_url_list(&self, legacy_key: &str, value: Value) -> (u64, bool) {
        let Value::Array(items) = value else {
            warn!(key = legacy_key, "legacy URL list is not an array");
            return (0, false);
        };

        let mut migrated = 0;
        let mut complete = true;
        for item in items {
            let url: UrlRecord = match serde_json::from_value(item) {
                Ok(url) => url,
                Err(e) => {
                    warn!(key = legacy_key, error = %e, "skipping malformed legacy link");
                    complete = false;
                    continue;
                }
            };

            if self
                .get_record::<UrlRecord>(&url.id.to_string())
                .await
                .is_some()
            {
                continue;
            }

            if self.save_record(&url).await {
                migrated += 1;
            } else {
                complete = false;
            }
        }
        (migrated, complete)
    }
}

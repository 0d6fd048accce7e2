//! Export and import of user data (links and settings)

use crate::models::UrlRecord;
use crate::storage::StorageManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const EXPORT_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    pub urls: Vec<UrlRecord>,
    pub settings: BTreeMap<String, Value>,
    pub metadata: ExportMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub export_date: String,
    pub version: u32,
    pub compressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub urls_imported: u64,
    pub settings_imported: u64,
    pub errors: Vec<String>,
}

impl StorageManager {
    /// Links (decompressed) and settings; security and cache partitions stay out
    pub async fn export_all(&self) -> ExportPayload {
        ExportPayload {
            urls: self.get_all_records::<UrlRecord>().await,
            settings: self.get_all_settings().await,
            metadata: ExportMetadata {
                export_date: chrono::Utc::now().to_rfc3339(),
                version: EXPORT_VERSION,
                compressed: self.is_compression_enabled(),
            },
        }
    }

    /// Import an export document item by item, collecting per-item errors
    pub async fn import_all(&self, payload: &Value) -> ImportResult {
        let mut result = ImportResult::default();

        match payload.get("urls") {
            Some(Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    match serde_json::from_value::<UrlRecord>(item.clone()) {
                        Ok(url) => {
                            if self.save_record(&url).await {
                                result.urls_imported += 1;
                            } else {
                                result
                                    .errors
                                    .push(format!("url[{index}]: failed to save '{}'", url.short_code));
                            }
                        }
                        Err(e) => result.errors.push(format!("url[{index}]: {e}")),
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => result.errors.push("urls: expected an array".to_string()),
        }

        match payload.get("settings") {
            Some(Value::Object(settings)) => {
                for (key, value) in settings {
                    if self.save_setting(key, value).await {
                        result.settings_imported += 1;
                    } else {
                        result.errors.push(format!("setting '{key}': failed to save"));
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => result.errors.push("settings: expected an object".to_string()),
        }

        if !result.errors.is_empty() {
            warn!(errors = result.errors.len(), "import finished with errors");
        }
        info!(
            urls = result.urls_imported,
            settings = result.settings_imported,
            "import complete"
        );
        result
    }

    pub async fn import_json(&self, raw: &str) -> ImportResult {
        match serde_json::from_str::<Value>(raw) {
            Ok(payload) => self.import_all(&payload).await,
            Err(e) => ImportResult {
                errors: vec![format!("invalid export document: {e}")],
                ..ImportResult::default()
            },
        }
    }
}

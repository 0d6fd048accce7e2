use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub flat_store: FlatStoreConfig,
    pub links: LinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite URL of the structured store; `None` runs on the flat store alone
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub memory_cache_capacity: u64,
    /// Optional time-to-live for memory cache entries
    pub memory_cache_ttl_secs: Option<u64>,
    /// Default TTL of `set_cache` entries
    pub cache_ttl_secs: u64,
    pub security_log_retention_days: i64,
    pub security_log_max_entries: u64,
    pub maintenance_interval_secs: u64,
    pub compression_level: i32,
    /// Directory and quota used for the storage estimate
    pub quota_dir: Option<PathBuf>,
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatStoreConfig {
    /// JSON file backing the flat store; `None` keeps it in memory
    pub path: Option<PathBuf>,
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub short_code_length: usize,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            memory_cache_capacity: StorageConfig::default_memory_cache_capacity(),
            memory_cache_ttl_secs: None,
            cache_ttl_secs: 3600,
            security_log_retention_days: 30,
            security_log_max_entries: 1000,
            maintenance_interval_secs: 300,
            compression_level: 3,
            quota_dir: None,
            quota_bytes: None,
        }
    }
}

impl StorageConfig {
    const fn default_memory_cache_capacity() -> u64 {
        10_000
    }

    /// Structured store on a private in-memory SQLite database
    pub fn in_memory() -> Self {
        Self {
            database_url: Some("sqlite::memory:".to_string()),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            short_code_length: 6,
            rate_limit_max_requests: 10,
            rate_limit_window_secs: 60,
        }
    }
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        _ => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = StorageConfig::default();

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) if url.trim().is_empty() || url.eq_ignore_ascii_case("none") => None,
            Ok(url) => Some(url),
            Err(_) => Some("sqlite://./tierlink.db".to_string()),
        };

        let storage = StorageConfig {
            database_url,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            memory_cache_capacity: env_parse("MEMORY_CACHE_CAPACITY")?
                .unwrap_or(defaults.memory_cache_capacity),
            memory_cache_ttl_secs: env_parse("MEMORY_CACHE_TTL_SECS")?,
            cache_ttl_secs: env_parse("CACHE_TTL_SECS")?.unwrap_or(defaults.cache_ttl_secs),
            security_log_retention_days: env_parse("SECURITY_LOG_RETENTION_DAYS")?
                .unwrap_or(defaults.security_log_retention_days),
            security_log_max_entries: env_parse("SECURITY_LOG_MAX_ENTRIES")?
                .unwrap_or(defaults.security_log_max_entries),
            maintenance_interval_secs: env_parse("MAINTENANCE_INTERVAL_SECS")?
                .unwrap_or(defaults.maintenance_interval_secs),
            compression_level: env_parse("COMPRESSION_LEVEL")?
                .unwrap_or(defaults.compression_level),
            quota_dir: std::env::var("STORAGE_QUOTA_DIR").ok().map(PathBuf::from),
            quota_bytes: env_parse("STORAGE_QUOTA_BYTES")?,
        };

        let flat_store = FlatStoreConfig {
            path: Some(
                std::env::var("FLAT_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./tierlink-flat.json")),
            ),
            max_bytes: env_parse("FLAT_STORE_MAX_BYTES")?,
        };

        let link_defaults = LinkConfig::default();
        let links = LinkConfig {
            short_code_length: env_parse("SHORT_CODE_LENGTH")?
                .unwrap_or(link_defaults.short_code_length),
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS")?
                .unwrap_or(link_defaults.rate_limit_max_requests),
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW_SECS")?
                .unwrap_or(link_defaults.rate_limit_window_secs),
        };

        if links.short_code_length == 0 {
            tracing::warn!("SHORT_CODE_LENGTH must be positive, falling back to 6");
        }

        Ok(Config {
            storage,
            flat_store,
            links: LinkConfig {
                short_code_length: if links.short_code_length == 0 {
                    link_defaults.short_code_length
                } else {
                    links.short_code_length
                },
                ..links
            },
        })
    }
}

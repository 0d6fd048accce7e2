//! Integration tests for the tiered storage manager
//!
//! Covers write-through and read fallback across tiers, upserts, compression,
//! cache expiry, statistics and lifecycle.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tierlink::config::StorageConfig;
use tierlink::models::{now_millis, CacheEntry, UrlRecord};
use tierlink::storage::{
    FileFlatStore, FlatStore, MemoryFlatStore, Partition, QuotaEstimate,
    QuotaEstimator, StorageManager, COMPRESSION_SETTING,
};

/// Helper to create a manager on an in-memory SQLite database
async fn create_test_manager() -> StorageManager {
    let manager = StorageManager::new(StorageConfig::in_memory(), Arc::new(MemoryFlatStore::new()));
    manager.init().await;
    manager
}

/// Helper to create a manager without a structured store
async fn create_flat_only_manager(flat: Arc<dyn FlatStore>) -> StorageManager {
    let manager = StorageManager::new(StorageConfig::default(), flat);
    manager.init().await;
    manager
}

fn url_record(id: i64, short_code: &str, original_url: &str) -> UrlRecord {
    serde_json::from_value(json!({
        "id": id,
        "originalUrl": original_url,
        "shortCode": short_code,
        "createdAt": now_millis(),
    }))
    .unwrap()
}

#[tokio::test]
async fn test_write_then_read() {
    let manager = create_test_manager().await;
    assert!(manager.is_initialized());
    assert!(manager.is_structured_available());

    let url = url_record(1, "abc123", "https://example.com");
    assert!(manager.save_record(&url).await);

    let loaded: UrlRecord = manager.get_record("1").await.unwrap();
    assert_eq!(loaded, url);
    assert!(manager.get_record::<UrlRecord>("2").await.is_none());
}

#[tokio::test]
async fn test_save_is_an_upsert() {
    let manager = create_test_manager().await;

    let mut url = url_record(1, "abc123", "https://example.com");
    assert!(manager.save_record(&url).await);
    url.clicks = 5;
    assert!(manager.save_record(&url).await);

    let all = manager.get_all_records::<UrlRecord>().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].clicks, 5);
    assert_eq!(manager.get_record::<UrlRecord>("1").await.unwrap().clicks, 5);
}

#[tokio::test]
async fn test_duplicate_short_code_is_rejected() {
    let manager = create_test_manager().await;

    assert!(manager.save_record(&url_record(1, "dup", "https://a.example")).await);
    assert!(!manager.save_record(&url_record(2, "dup", "https://b.example")).await);

    let all = manager.get_all_records::<UrlRecord>().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, 1);
}

#[tokio::test]
async fn test_falls_back_to_flat_store_without_database() {
    let flat: Arc<dyn FlatStore> = Arc::new(MemoryFlatStore::new());
    let manager = create_flat_only_manager(Arc::clone(&flat)).await;

    assert!(manager.is_initialized());
    assert!(!manager.is_structured_available());
    assert!(manager.save_record(&url_record(7, "flat01", "https://example.com")).await);
    assert!(flat.get_item("urls_7").unwrap().is_some());

    // A fresh manager over the same flat store sees the record
    let reopened = create_flat_only_manager(flat).await;
    let loaded: UrlRecord = reopened.get_record("7").await.unwrap();
    assert_eq!(loaded.short_code, "flat01");
    assert_eq!(reopened.get_all_records::<UrlRecord>().await.len(), 1);
}

#[tokio::test]
async fn test_unopenable_database_degrades_to_flat_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        database_url: Some(format!(
            "sqlite://{}/missing/nested/tierlink.db",
            dir.path().display()
        )),
        ..StorageConfig::default()
    };

    let manager = StorageManager::new(config, Arc::new(MemoryFlatStore::new()));
    manager.init().await;

    assert!(manager.is_initialized());
    assert!(!manager.is_structured_available());
    assert!(manager.save_setting("theme", "dark").await);
    assert_eq!(manager.get_setting("theme", String::new()).await, "dark");
}

#[tokio::test]
async fn test_flat_store_quota_failure_reports_false() {
    let dir = tempfile::tempdir().unwrap();
    let flat = FileFlatStore::open(dir.path().join("flat.json"), Some(64)).unwrap();
    let manager = create_flat_only_manager(Arc::new(flat)).await;

    let url = url_record(1, "toolong", &format!("https://example.com/{}", "x".repeat(200)));
    assert!(!manager.save_record(&url).await);
    assert!(manager.get_record::<UrlRecord>("1").await.is_none());
}

#[tokio::test]
async fn test_compression_round_trip_and_mixed_records() {
    let manager = create_test_manager().await;

    let plain = url_record(1, "plain1", "https://example.com/plain");
    assert!(manager.save_record(&plain).await);

    manager.set_compression_enabled(true);
    let mut packed = url_record(2, "packed", "https://example.com/packed");
    packed.conversion_goals = vec!["signup".to_string(); 50];
    assert!(manager.save_record(&packed).await);

    // Both encodings read back transparently
    assert_eq!(manager.get_record::<UrlRecord>("1").await.unwrap(), plain);
    assert_eq!(manager.get_record::<UrlRecord>("2").await.unwrap(), packed);
    assert_eq!(manager.get_all_records::<UrlRecord>().await.len(), 2);

    // Optimisation re-saves the record written before compression was on
    let result = manager.optimize_storage().await.unwrap();
    assert_eq!(result.recompressed, 1);
    assert_eq!(manager.optimize_storage().await.unwrap().recompressed, 0);
    assert_eq!(manager.get_record::<UrlRecord>("1").await.unwrap(), plain);
}

#[tokio::test]
async fn test_compression_setting_is_loaded() {
    let manager = create_test_manager().await;
    assert!(!manager.is_compression_enabled());

    assert!(manager.save_setting(COMPRESSION_SETTING, true).await);
    manager.load_settings().await;
    assert!(manager.is_compression_enabled());
}

#[tokio::test]
async fn test_settings() {
    let manager = create_test_manager().await;

    assert_eq!(manager.get_setting("missing", 42u32).await, 42);
    assert!(manager.save_setting("limit", 10u32).await);
    assert!(manager.save_setting("name", "tierlink").await);
    assert_eq!(manager.get_setting("limit", 0u32).await, 10);

    let all = manager.get_all_settings().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all["name"], json!("tierlink"));
}

#[tokio::test]
async fn test_cache_entries_expire() {
    let manager = create_test_manager().await;

    assert!(manager.set_cache("fresh", json!({"n": 1}), None).await);
    assert!(
        manager
            .set_cache("stale", "gone soon", Some(Duration::from_millis(1)))
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        manager.get_cache::<serde_json::Value>("fresh").await,
        Some(json!({"n": 1}))
    );
    assert!(manager.get_cache::<String>("stale").await.is_none());
    // The stale read evicted the entry
    assert_eq!(manager.get_storage_stats().await.partitions["cache"], 1);
}

#[tokio::test]
async fn test_delete_and_clear_partition() {
    let manager = create_test_manager().await;

    for id in 1..=3 {
        let url = url_record(id, &format!("code{id}"), "https://example.com");
        assert!(manager.save_record(&url).await);
    }
    assert!(manager.save_setting("keep", true).await);

    assert!(manager.delete_record(Partition::Urls, "2").await);
    assert!(!manager.delete_record(Partition::Urls, "2").await);
    assert!(manager.get_record::<UrlRecord>("2").await.is_none());

    assert!(manager.clear_partition(Partition::Urls).await);
    assert!(manager.get_all_records::<UrlRecord>().await.is_empty());
    assert!(manager.get_record::<UrlRecord>("1").await.is_none());
    assert!(manager.get_setting("keep", false).await);
}

#[tokio::test]
async fn test_storage_stats() {
    let manager = create_test_manager().await;

    assert!(manager.save_record(&url_record(1, "one", "https://example.com")).await);
    assert!(manager.save_record(&url_record(2, "two", "https://example.com")).await);
    assert!(manager.log_security_event("test", json!({})).await);

    let stats = manager.get_storage_stats().await;
    assert!(stats.structured_available);
    assert_eq!(stats.partitions["urls"], 2);
    assert_eq!(stats.partitions["security"], 1);
    assert_eq!(stats.partitions["analytics"], 0);
    assert!(stats.fallback_bytes > 0);
    assert!(stats.memory_entries >= 3);
}

#[tokio::test]
async fn test_flat_only_stats_count_prefixes() {
    let manager = create_flat_only_manager(Arc::new(MemoryFlatStore::new())).await;

    assert!(manager.save_record(&url_record(1, "one", "https://example.com")).await);
    assert!(manager.save_setting("a", 1).await);

    let stats = manager.get_storage_stats().await;
    assert!(!stats.structured_available);
    assert_eq!(stats.partitions["urls"], 1);
    assert_eq!(stats.partitions["settings"], 1);
}

#[tokio::test]
async fn test_security_logs_are_newest_first() {
    let manager = create_test_manager().await;

    for kind in ["first", "second", "third"] {
        assert!(manager.log_security_event(kind, json!({"kind": kind})).await);
    }

    let logs = manager.get_security_logs().await;
    let kinds: Vec<&str> = logs.iter().map(|l| l.kind.as_str()).collect();
    assert_eq!(kinds, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let manager = create_test_manager().await;
    assert!(manager.save_setting("x", 1).await);

    manager.destroy().await;
    assert!(!manager.is_initialized());
    assert!(!manager.is_structured_available());
    manager.destroy().await;
    assert!(!manager.is_initialized());

    // Re-initialising brings the manager back
    manager.init().await;
    assert!(manager.is_initialized());
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let manager = create_test_manager().await;
    assert!(manager.save_setting("x", 1).await);

    manager.init().await;
    assert_eq!(manager.get_setting("x", 0).await, 1);
}

#[tokio::test]
async fn test_failed_mirror_write_keeps_reads_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let flat = FileFlatStore::open(dir.path().join("flat.json"), Some(400)).unwrap();
    let manager = StorageManager::new(StorageConfig::in_memory(), Arc::new(flat));
    manager.init().await;

    let mut url = url_record(1, "abc123", "https://example.com");
    assert!(manager.save_record(&url).await);

    // Fits the structured store but not the flat quota
    url.clicks = 5;
    url.original_url = format!("https://example.com/{}", "x".repeat(500));
    assert!(!manager.save_record(&url).await);

    let single: UrlRecord = manager.get_record("1").await.unwrap();
    let all = manager.get_all_records::<UrlRecord>().await;
    assert_eq!(all.len(), 1);
    assert_eq!(single.clicks, all[0].clicks);
    assert_eq!(single.clicks, 5);
}

#[tokio::test]
async fn test_init_rehydrates_memory_from_flat_cache_entries() {
    let flat: Arc<dyn FlatStore> = Arc::new(MemoryFlatStore::new());
    let entry = CacheEntry {
        key: "warm".to_string(),
        data: json!({"hits": 3}),
        timestamp: now_millis(),
        expiry: now_millis() + 3_600_000,
    };
    flat.set_item("cache_warm", &serde_json::to_string(&entry).unwrap())
        .unwrap();
    flat.set_item("urls_9", "{\"id\":9}").unwrap();

    let manager = create_flat_only_manager(Arc::clone(&flat)).await;
    assert_eq!(manager.get_storage_stats().await.memory_entries, 1);

    // Served from memory once the flat copy is gone
    flat.remove_item("cache_warm").unwrap();
    assert_eq!(
        manager.get_cache::<serde_json::Value>("warm").await,
        Some(json!({"hits": 3}))
    );
}

#[tokio::test]
async fn test_write_then_read_is_served_from_memory() {
    let flat: Arc<dyn FlatStore> = Arc::new(MemoryFlatStore::new());
    let manager = create_flat_only_manager(Arc::clone(&flat)).await;

    let url = url_record(3, "mem003", "https://example.com");
    assert!(manager.save_record(&url).await);

    // No structured store, and the flat copy is removed behind the manager's back
    flat.remove_item("urls_3").unwrap();
    assert!(flat.get_item("urls_3").unwrap().is_none());

    assert_eq!(manager.get_record::<UrlRecord>("3").await, Some(url));
}

struct FixedQuota;

impl QuotaEstimator for FixedQuota {
    fn estimate(&self) -> Option<QuotaEstimate> {
        Some(QuotaEstimate {
            usage: 1024,
            quota: Some(4096),
        })
    }
}

#[tokio::test]
async fn test_quota_estimate_is_captured_at_init() {
    let manager = StorageManager::new(StorageConfig::in_memory(), Arc::new(MemoryFlatStore::new()))
        .with_quota_estimator(Arc::new(FixedQuota));
    assert!(manager.quota_estimate().is_none());

    manager.init().await;
    let expected = QuotaEstimate {
        usage: 1024,
        quota: Some(4096),
    };
    assert_eq!(manager.quota_estimate(), Some(expected));
    assert_eq!(manager.get_storage_stats().await.quota, Some(expected));
}

#[tokio::test]
async fn test_quota_estimate_from_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.bin"), vec![0u8; 100]).unwrap();

    let config = StorageConfig {
        quota_dir: Some(dir.path().to_path_buf()),
        quota_bytes: Some(1000),
        ..StorageConfig::default()
    };
    let manager = StorageManager::new(config, Arc::new(MemoryFlatStore::new()));
    manager.init().await;

    let quota = manager.get_storage_stats().await.quota.unwrap();
    assert_eq!(quota.usage, 100);
    assert_eq!(quota.quota, Some(1000));
}

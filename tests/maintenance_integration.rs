//! Maintenance, retention and scheduler tests

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tierlink::config::StorageConfig;
use tierlink::models::{next_record_id, now_millis, SecurityLogEntry, UrlRecord};
use tierlink::storage::{MaintenanceScheduler, MemoryFlatStore, StorageManager};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

async fn create_test_manager(config: StorageConfig) -> Arc<StorageManager> {
    let manager = StorageManager::new(config, Arc::new(MemoryFlatStore::new()));
    manager.init().await;
    Arc::new(manager)
}

fn url_record(id: i64, short_code: &str) -> UrlRecord {
    serde_json::from_value(json!({
        "id": id,
        "originalUrl": "https://example.com",
        "shortCode": short_code,
        "createdAt": now_millis() - 365 * DAY_MS,
    }))
    .unwrap()
}

fn security_entry(kind: &str, timestamp: i64) -> SecurityLogEntry {
    SecurityLogEntry {
        id: next_record_id(),
        kind: kind.to_string(),
        timestamp,
        payload: json!({}),
    }
}

#[tokio::test]
async fn test_clear_expired_cache_only_touches_stale_entries() {
    let manager = create_test_manager(StorageConfig::in_memory()).await;

    assert!(manager.set_cache("a", 1, Some(Duration::from_millis(1))).await);
    assert!(manager.set_cache("b", 2, Some(Duration::from_millis(1))).await);
    assert!(manager.set_cache("c", 3, Some(Duration::from_secs(3600))).await);
    assert!(manager.save_record(&url_record(1, "keep01")).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(manager.clear_expired_cache().await, 2);
    assert_eq!(manager.clear_expired_cache().await, 0);
    assert_eq!(manager.get_cache::<i32>("c").await, Some(3));
    assert!(manager.get_cache::<i32>("a").await.is_none());
    assert_eq!(manager.get_all_records::<UrlRecord>().await.len(), 1);
}

#[tokio::test]
async fn test_clear_expired_cache_without_structured_store() {
    let manager = create_test_manager(StorageConfig::default()).await;
    assert!(manager.set_cache("a", 1, Some(Duration::from_millis(1))).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(manager.clear_expired_cache().await, 0);
    assert!(manager.get_cache::<i32>("a").await.is_none());
}

#[tokio::test]
async fn test_prune_security_logs_by_age() {
    let manager = create_test_manager(StorageConfig::in_memory()).await;
    let now = now_millis();

    assert!(manager.save_record(&security_entry("old", now - 40 * DAY_MS)).await);
    assert!(manager.save_record(&security_entry("older", now - 90 * DAY_MS)).await);
    assert!(manager.save_record(&security_entry("recent", now - DAY_MS)).await);

    assert_eq!(manager.prune_security_logs().await, 2);

    let logs = manager.get_security_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, "recent");
}

#[tokio::test]
async fn test_trim_security_logs_keeps_most_recent() {
    let manager = create_test_manager(StorageConfig::in_memory()).await;
    let now = now_millis();

    for i in 0..5 {
        let entry = security_entry(&format!("event{i}"), now - (5 - i) * 1000);
        assert!(manager.save_record(&entry).await);
    }

    assert_eq!(manager.trim_security_logs(2).await, 3);

    let kinds: Vec<String> = manager
        .get_security_logs()
        .await
        .into_iter()
        .map(|l| l.kind)
        .collect();
    assert_eq!(kinds, vec!["event4", "event3"]);
}

#[tokio::test]
async fn test_perform_maintenance_never_removes_links() {
    let config = StorageConfig {
        security_log_max_entries: 1,
        ..StorageConfig::in_memory()
    };
    let manager = create_test_manager(config).await;
    let now = now_millis();

    for id in 1..=3 {
        assert!(manager.save_record(&url_record(id, &format!("old{id}"))).await);
    }
    assert!(manager.save_setting("theme", "dark").await);
    assert!(manager.set_cache("stale", 1, Some(Duration::from_millis(1))).await);
    assert!(manager.save_record(&security_entry("ancient", now - 60 * DAY_MS)).await);
    assert!(manager.save_record(&security_entry("a", now - 2000)).await);
    assert!(manager.save_record(&security_entry("b", now - 1000)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = manager.perform_maintenance().await;
    assert_eq!(report.expired_cache_cleared, 1);
    assert_eq!(report.security_logs_pruned, 1);
    let optimization = report.optimization.unwrap();
    assert_eq!(optimization.logs_removed, 1);

    assert_eq!(manager.get_all_records::<UrlRecord>().await.len(), 3);
    assert_eq!(manager.get_setting("theme", String::new()).await, "dark");
    assert_eq!(manager.get_security_logs().await.len(), 1);
}

#[tokio::test]
async fn test_scheduler_runs_until_shutdown() {
    let manager = create_test_manager(StorageConfig::in_memory()).await;
    assert!(manager.set_cache("stale", 1, Some(Duration::from_millis(1))).await);

    let scheduler = MaintenanceScheduler::start(Arc::clone(&manager), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let runs = scheduler.shutdown().await;

    assert!(runs >= 1, "expected at least one maintenance run, got {runs}");
    assert_eq!(manager.get_storage_stats().await.partitions["cache"], 0);
}

#[tokio::test]
async fn test_security_retention_without_structured_store() {
    let config = StorageConfig {
        security_log_max_entries: 2,
        ..StorageConfig::default()
    };
    let manager = create_test_manager(config).await;
    let now = now_millis();

    assert!(manager.save_record(&security_entry("ancient", now - 45 * DAY_MS)).await);
    for i in 0..4 {
        let entry = security_entry(&format!("event{i}"), now - (4 - i) * 1000);
        assert!(manager.save_record(&entry).await);
    }

    assert_eq!(manager.prune_security_logs().await, 1);
    assert_eq!(manager.trim_security_logs(2).await, 2);

    let kinds: Vec<String> = manager
        .get_security_logs()
        .await
        .into_iter()
        .map(|l| l.kind)
        .collect();
    assert_eq!(kinds, vec!["event3", "event2"]);
    assert_eq!(manager.get_storage_stats().await.partitions["security"], 2);
}

#[tokio::test]
async fn test_optimize_runs_without_structured_store() {
    let manager = create_test_manager(StorageConfig::default()).await;
    manager.set_compression_enabled(true);
    assert!(manager.save_record(&url_record(1, "flat01")).await);

    let result = manager.optimize_storage().await.unwrap();
    assert_eq!(result.cache_cleared, 0);
    assert_eq!(manager.get_all_records::<UrlRecord>().await.len(), 1);
}

#[tokio::test]
async fn test_huge_retention_period_prunes_nothing() {
    let config = StorageConfig {
        security_log_retention_days: i64::MAX,
        ..StorageConfig::in_memory()
    };
    let manager = create_test_manager(config).await;
    assert!(
        manager
            .save_record(&security_entry("old", now_millis() - 400 * DAY_MS))
            .await
    );

    assert_eq!(manager.prune_security_logs().await, 0);
    assert_eq!(manager.get_security_logs().await.len(), 1);
}

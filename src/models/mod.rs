mod records;
mod url;

pub use records::{CacheEntry, SecurityLogEntry, SettingEntry};
pub use url::{AbTest, ClickEvent, LinkStatus, SecurityScan, UrlRecord, Variant};

pub use crate::analytics::AnalyticsRecord;

use crate::storage::Partition;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};

/// A record type owned by exactly one partition
pub trait PartitionRecord: Serialize + DeserializeOwned + Send + Sync {
    const PARTITION: Partition;

    fn primary_key(&self) -> String;
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Creation-time derived id, strictly increasing within the process
pub fn next_record_id() -> i64 {
    let now = now_millis();
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_are_monotonic() {
        let ids: Vec<i64> = (0..1000).map(|_| next_record_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}

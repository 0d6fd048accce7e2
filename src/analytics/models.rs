//! Data models for per-link click analytics

use crate::models::{ClickEvent, PartitionRecord};
use crate::storage::Partition;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated analytics for one link, keyed by the link id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    /// Id of the link these numbers belong to
    pub url_id: String,

    /// Last update (epoch milliseconds)
    pub timestamp: i64,

    pub total_clicks: u64,

    pub unique_clicks: u64,

    /// Clicks per UTC day (YYYY-MM-DD)
    #[serde(default)]
    pub daily: BTreeMap<String, u64>,

    /// Clicks per referrer host, "direct" when there was none
    #[serde(default)]
    pub referrers: BTreeMap<String, u64>,
}

impl AnalyticsRecord {
    pub fn new(url_id: i64) -> Self {
        Self {
            url_id: url_id.to_string(),
            timestamp: 0,
            total_clicks: 0,
            unique_clicks: 0,
            daily: BTreeMap::new(),
            referrers: BTreeMap::new(),
        }
    }

    /// Fold one click into the aggregates
    pub fn record_click(&mut self, click: &ClickEvent, unique: bool) {
        self.timestamp = click.timestamp;
        self.total_clicks += 1;
        if unique {
            self.unique_clicks += 1;
        }

        *self.daily.entry(day_bucket(click.timestamp)).or_insert(0) += 1;
        *self
            .referrers
            .entry(referrer_host(click.referrer.as_deref()))
            .or_insert(0) += 1;
    }
}

impl PartitionRecord for AnalyticsRecord {
    const PARTITION: Partition = Partition::Analytics;

    fn primary_key(&self) -> String {
        self.url_id.clone()
    }
}

fn day_bucket(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn referrer_host(referrer: Option<&str>) -> String {
    referrer
        .filter(|r| !r.is_empty())
        .and_then(|r| url::Url::parse(r).ok())
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "direct".to_string())
}

use crate::models::PartitionRecord;
use crate::storage::Partition;
use serde::{Deserialize, Serialize};

/// A shortened link and everything tracked about it.
///
/// Field defaults let records written by older versions, which carried only a
/// handful of these attributes, deserialize without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecord {
    pub id: i64,
    pub original_url: String,
    pub short_code: String,
    #[serde(default)]
    pub custom_alias: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default = "default_true")]
    pub track_clicks: bool,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub unique_clicks: u64,
    #[serde(default)]
    pub click_history: Vec<ClickEvent>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(default)]
    pub ab_test: Option<AbTest>,
    #[serde(default)]
    pub security_scan: Option<SecurityScan>,
    #[serde(default)]
    pub conversions: u64,
    #[serde(default)]
    pub conversion_goals: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub timestamp: i64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    /// Coarse geo placeholders, never resolved locally
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub visitor_id: Option<String>,
    #[serde(default)]
    pub variant: Option<Variant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    A,
    B,
}

/// A/B split between the original URL (variant A) and an alternative (variant B)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbTest {
    pub alternative_url: String,
    /// Percentage of traffic sent to variant B (0-100)
    pub split: u8,
    #[serde(default)]
    pub clicks_a: u64,
    #[serde(default)]
    pub clicks_b: u64,
    #[serde(default)]
    pub conversions_a: u64,
    #[serde(default)]
    pub conversions_b: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScan {
    pub safe: bool,
    #[serde(default)]
    pub threats: Vec<String>,
    pub scanned_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Expired,
    Inactive,
}

impl UrlRecord {
    /// Status is computed, expired records are never physically removed
    pub fn status(&self, now: i64) -> LinkStatus {
        if !self.is_active {
            LinkStatus::Inactive
        } else if self.expires_at.is_some_and(|at| at <= now) {
            LinkStatus::Expired
        } else {
            LinkStatus::Active
        }
    }

    /// Whether `code` addresses this link, by short code or custom alias
    pub fn answers_to(&self, code: &str) -> bool {
        self.short_code == code || self.custom_alias.as_deref() == Some(code)
    }
}

impl PartitionRecord for UrlRecord {
    const PARTITION: Partition = Partition::Urls;

    fn primary_key(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_record_gets_defaults() {
        let legacy = r#"{"id":7,"originalUrl":"https://example.com","shortCode":"xyz789","createdAt":10,"clicks":4}"#;
        let url: UrlRecord = serde_json::from_str(legacy).unwrap();

        assert_eq!(url.clicks, 4);
        assert!(url.is_active);
        assert!(url.track_clicks);
        assert!(url.click_history.is_empty());
        assert_eq!(url.status(11), LinkStatus::Active);
    }

    #[test]
    fn test_status_is_computed_from_expiry() {
        let mut url: UrlRecord = serde_json::from_str(
            r#"{"id":1,"originalUrl":"https://a.example","shortCode":"aaaaaa","createdAt":0}"#,
        )
        .unwrap();
        url.expires_at = Some(100);

        assert_eq!(url.status(99), LinkStatus::Active);
        assert_eq!(url.status(100), LinkStatus::Expired);

        url.is_active = false;
        assert_eq!(url.status(0), LinkStatus::Inactive);
    }
}

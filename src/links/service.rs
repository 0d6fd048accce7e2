use crate::analytics::AnalyticsRecord;
use crate::config::LinkConfig;
use crate::links::password::{hash_password, verify_password};
use crate::links::rate_limit::{RateDecision, RateLimitState, RateLimiter};
use crate::links::scanner::MalwareScanner;
use crate::links::shortcode::{is_valid_alias, ShortCodeGenerator};
use crate::models::{
    next_record_id, now_millis, AbTest, ClickEvent, LinkStatus, UrlRecord, Variant,
};
use crate::storage::{Partition, StorageManager};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const RATE_LIMIT_SETTING: &str = "rateLimit";
pub const SECURITY_STATS_SETTING: &str = "securityStats";

/// Most recent click events kept on a link
const MAX_CLICK_HISTORY: usize = 1000;

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("rate limit exceeded, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: i64 },
    #[error("URL failed the security scan: {}", .0.join(", "))]
    Unsafe(Vec<String>),
    #[error("invalid custom alias '{0}'")]
    InvalidAlias(String),
    #[error("short code '{0}' is already taken")]
    Conflict(String),
    #[error("invalid A/B split {0}, expected 0-100")]
    InvalidSplit(u8),
    #[error("could not generate a unique short code")]
    CodeSpaceExhausted,
    #[error("failed to save the link, storage might be full")]
    Storage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("link not found")]
    NotFound,
    #[error("link has been deactivated")]
    Inactive,
    #[error("link has expired")]
    Expired,
    #[error("link is password protected")]
    PasswordRequired,
    #[error("wrong password")]
    WrongPassword,
}

#[derive(Debug, Clone, Default)]
pub struct ShortenRequest {
    pub url: String,
    pub custom_alias: Option<String>,
    pub expires_at: Option<i64>,
    pub password: Option<String>,
    pub track_clicks: bool,
    pub ab_test: Option<AbTestRequest>,
    pub conversion_goals: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AbTestRequest {
    pub alternative_url: String,
    /// Percentage of traffic sent to the alternative
    pub split: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ClickContext {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub visitor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub url_id: i64,
    pub target: String,
    pub variant: Option<Variant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    #[serde(default)]
    pub scanned: u64,
    #[serde(default)]
    pub blocked: u64,
    #[serde(default)]
    pub rate_limited: u64,
}

/// Shortening and redirect rules on top of the storage manager
pub struct LinkService {
    storage: Arc<StorageManager>,
    scanner: MalwareScanner,
    limiter: RateLimiter,
    generator: ShortCodeGenerator,
}

impl LinkService {
    pub fn new(storage: Arc<StorageManager>, config: &LinkConfig) -> Self {
        Self {
            storage,
            scanner: MalwareScanner::default(),
            limiter: RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window_secs),
            generator: ShortCodeGenerator::new(config.short_code_length),
        }
    }

    pub fn with_scanner(mut self, scanner: MalwareScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    async fn bump_stats(&self, update: impl FnOnce(&mut SecurityStats)) {
        let mut stats: SecurityStats = self
            .storage
            .get_setting(SECURITY_STATS_SETTING, SecurityStats::default())
            .await;
        update(&mut stats);
        self.storage.save_setting(SECURITY_STATS_SETTING, stats).await;
    }

    pub async fn security_stats(&self) -> SecurityStats {
        self.storage
            .get_setting(SECURITY_STATS_SETTING, SecurityStats::default())
            .await
    }

    async fn check_rate_limit(&self, url: &str) -> Result<(), ShortenError> {
        let raw: Value = self.storage.get_setting(RATE_LIMIT_SETTING, Value::Null).await;
        let mut state = RateLimitState::from_value(raw);
        let decision = self.limiter.check(&mut state, now_millis());
        self.storage.save_setting(RATE_LIMIT_SETTING, &state).await;

        match decision {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after_ms } => {
                warn!(retry_after_ms, "shorten request rate limited");
                self.storage
                    .log_security_event("rate_limit", json!({ "url": url }))
                    .await;
                self.bump_stats(|s| s.rate_limited += 1).await;
                Err(ShortenError::RateLimited { retry_after_ms })
            }
        }
    }

    async fn scan(&self, url: &str) -> Result<crate::models::SecurityScan, ShortenError> {
        let scan = self.scanner.scan(url);
        let safe = scan.safe;
        self.bump_stats(|s| {
            s.scanned += 1;
            if !safe {
                s.blocked += 1;
            }
        })
        .await;

        if safe {
            Ok(scan)
        } else {
            warn!(url, threats = ?scan.threats, "URL blocked by security scan");
            self.storage
                .log_security_event(
                    "malware_blocked",
                    json!({ "url": url, "threats": scan.threats }),
                )
                .await;
            Err(ShortenError::Unsafe(scan.threats))
        }
    }

    /// Validate, rate-limit, scan and store a new link
    pub async fn shorten(&self, request: ShortenRequest) -> Result<UrlRecord, ShortenError> {
        let parsed = url::Url::parse(&request.url)
            .map_err(|e| ShortenError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ShortenError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        self.check_rate_limit(&request.url).await?;
        let security_scan = self.scan(&request.url).await?;

        let ab_test = match request.ab_test {
            Some(ab) => {
                if ab.split > 100 {
                    return Err(ShortenError::InvalidSplit(ab.split));
                }
                self.scan(&ab.alternative_url).await?;
                Some(AbTest {
                    alternative_url: ab.alternative_url,
                    split: ab.split,
                    clicks_a: 0,
                    clicks_b: 0,
                    conversions_a: 0,
                    conversions_b: 0,
                })
            }
            None => None,
        };

        let existing = self.storage.get_all_records::<UrlRecord>().await;
        let taken: HashSet<&str> = existing
            .iter()
            .flat_map(|u| std::iter::once(u.short_code.as_str()).chain(u.custom_alias.as_deref()))
            .collect();

        let custom_alias = match request.custom_alias.filter(|a| !a.is_empty()) {
            Some(alias) => {
                if !is_valid_alias(&alias) {
                    return Err(ShortenError::InvalidAlias(alias));
                }
                if taken.contains(alias.as_str()) {
                    return Err(ShortenError::Conflict(alias));
                }
                Some(alias)
            }
            None => None,
        };

        let short_code = self
            .generator
            .generate(|code| taken.contains(code) || custom_alias.as_deref() == Some(code))
            .ok_or(ShortenError::CodeSpaceExhausted)?;

        let is_protected = request.password.as_deref().is_some_and(|p| !p.is_empty());
        let record = UrlRecord {
            id: next_record_id(),
            original_url: request.url,
            short_code,
            custom_alias,
            created_at: now_millis(),
            expires_at: request.expires_at,
            track_clicks: request.track_clicks,
            clicks: 0,
            unique_clicks: 0,
            click_history: Vec::new(),
            is_active: true,
            password_hash: request
                .password
                .filter(|p| !p.is_empty())
                .map(|p| hash_password(&p)),
            is_protected,
            ab_test,
            security_scan: Some(security_scan),
            conversions: 0,
            conversion_goals: request.conversion_goals,
        };

        if !self.storage.save_record(&record).await {
            return Err(ShortenError::Storage);
        }

        info!(short_code = %record.short_code, id = record.id, "link created");
        Ok(record)
    }

    /// Look a link up by short code or custom alias
    pub async fn find(&self, code: &str) -> Option<UrlRecord> {
        self.storage
            .get_all_records::<UrlRecord>()
            .await
            .into_iter()
            .find(|u| u.answers_to(code))
    }

    /// Resolve a code for redirection, recording the click
    pub async fn resolve(
        &self,
        code: &str,
        password: Option<&str>,
        context: &ClickContext,
    ) -> Result<Resolution, ResolveError> {
        let mut url = self.find(code).await.ok_or(ResolveError::NotFound)?;
        let now = now_millis();

        match url.status(now) {
            LinkStatus::Active => {}
            LinkStatus::Inactive => return Err(ResolveError::Inactive),
            LinkStatus::Expired => return Err(ResolveError::Expired),
        }

        if url.is_protected {
            let Some(password) = password else {
                return Err(ResolveError::PasswordRequired);
            };
            let valid = url
                .password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash));
            if !valid {
                self.storage
                    .log_security_event("password_failure", json!({ "shortCode": url.short_code }))
                    .await;
                return Err(ResolveError::WrongPassword);
            }
        }

        let variant = url.ab_test.as_ref().map(|ab| {
            if rand::rng().random_range(0..100u8) < ab.split {
                Variant::B
            } else {
                Variant::A
            }
        });
        let target = match (&url.ab_test, variant) {
            (Some(ab), Some(Variant::B)) => ab.alternative_url.clone(),
            _ => url.original_url.clone(),
        };

        if url.track_clicks {
            self.track_click(&mut url, context, variant, now).await;
        }

        Ok(Resolution {
            url_id: url.id,
            target,
            variant,
        })
    }

    async fn track_click(
        &self,
        url: &mut UrlRecord,
        context: &ClickContext,
        variant: Option<Variant>,
        now: i64,
    ) {
        let identity = context.visitor_id.as_deref().or(context.user_agent.as_deref());
        let unique = match identity {
            Some(id) => !url.click_history.iter().any(|c| {
                c.visitor_id.as_deref().or(c.user_agent.as_deref()) == Some(id)
            }),
            None => true,
        };

        let click = ClickEvent {
            timestamp: now,
            user_agent: context.user_agent.clone(),
            referrer: context.referrer.clone(),
            country: None,
            city: None,
            visitor_id: context.visitor_id.clone(),
            variant,
        };

        url.clicks += 1;
        if unique {
            url.unique_clicks += 1;
        }
        if let Some(ab) = url.ab_test.as_mut() {
            match variant {
                Some(Variant::B) => ab.clicks_b += 1,
                _ => ab.clicks_a += 1,
            }
        }
        url.click_history.push(click.clone());
        if url.click_history.len() > MAX_CLICK_HISTORY {
            let excess = url.click_history.len() - MAX_CLICK_HISTORY;
            url.click_history.drain(..excess);
        }

        if !self.storage.save_record(&*url).await {
            warn!(short_code = %url.short_code, "failed to persist click");
        }

        let mut analytics = self
            .storage
            .get_record::<AnalyticsRecord>(&url.id.to_string())
            .await
            .unwrap_or_else(|| AnalyticsRecord::new(url.id));
        analytics.record_click(&click, unique);
        if !self.storage.save_record(&analytics).await {
            warn!(short_code = %url.short_code, "failed to persist analytics");
        }
    }

    /// Count a conversion for a link, attributed to an A/B variant when given
    pub async fn record_conversion(
        &self,
        code: &str,
        goal: Option<&str>,
        variant: Option<Variant>,
    ) -> Result<u64, ResolveError> {
        let mut url = self.find(code).await.ok_or(ResolveError::NotFound)?;

        url.conversions += 1;
        if let Some(goal) = goal {
            if !url.conversion_goals.iter().any(|g| g == goal) {
                url.conversion_goals.push(goal.to_string());
            }
        }
        if let Some(ab) = url.ab_test.as_mut() {
            match variant {
                Some(Variant::B) => ab.conversions_b += 1,
                _ => ab.conversions_a += 1,
            }
        }

        if !self.storage.save_record(&url).await {
            warn!(short_code = %url.short_code, "failed to persist conversion");
        }
        Ok(url.conversions)
    }

    /// Every link with its computed status, newest first
    pub async fn list(&self) -> Vec<(UrlRecord, LinkStatus)> {
        let now = now_millis();
        let mut urls = self.storage.get_all_records::<UrlRecord>().await;
        urls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        urls.into_iter()
            .map(|u| {
                let status = u.status(now);
                (u, status)
            })
            .collect()
    }

    pub async fn deactivate(&self, code: &str) -> bool {
        let Some(mut url) = self.find(code).await else {
            return false;
        };
        url.is_active = false;
        self.storage.save_record(&url).await
    }

    pub async fn delete(&self, code: &str) -> bool {
        let Some(url) = self.find(code).await else {
            return false;
        };
        let key = url.id.to_string();
        let deleted = self.storage.delete_record(Partition::Urls, &key).await;
        self.storage.delete_record(Partition::Analytics, &key).await;
        if deleted {
            info!(short_code = %url.short_code, "link deleted");
        }
        deleted
    }

    pub async fn clear_all(&self) -> bool {
        let urls = self.storage.clear_partition(Partition::Urls).await;
        let analytics = self.storage.clear_partition(Partition::Analytics).await;
        urls && analytics
    }
}

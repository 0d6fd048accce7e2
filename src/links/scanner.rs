use crate::models::{now_millis, SecurityScan};
use std::collections::HashSet;
use std::net::IpAddr;
use url::Url;

const BUILTIN_BLOCKLIST: &[&str] = &[
    "malware-example.com",
    "phishing-site.net",
    "virus-download.org",
    "scam-alert.biz",
    "fake-bank-login.com",
    "free-prize-winner.info",
];

const SUSPICIOUS_TLDS: &[&str] = &["tk", "ml", "ga", "cf", "gq", "zip", "mov"];

const PHISHING_KEYWORDS: &[&str] = &[
    "verify-account",
    "login-update",
    "secure-banking",
    "password-reset",
    "account-suspended",
];

const MAX_SUBDOMAIN_DEPTH: usize = 4;

/// Blocklist and heuristic checks applied before a link is stored
#[derive(Debug, Clone)]
pub struct MalwareScanner {
    blocked_domains: HashSet<String>,
}

impl Default for MalwareScanner {
    fn default() -> Self {
        Self::new(BUILTIN_BLOCKLIST.iter().map(|d| d.to_string()))
    }
}

impl MalwareScanner {
    pub fn new(blocked_domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked_domains: blocked_domains
                .into_iter()
                .map(|d| d.trim().trim_start_matches("www.").to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Add domains, e.g. from a downloaded list
    pub fn extend(&mut self, domains: impl IntoIterator<Item = String>) {
        let extra = MalwareScanner::new(domains).blocked_domains;
        self.blocked_domains.extend(extra);
    }

    fn is_blocked(&self, host: &str) -> bool {
        let host = host.trim_start_matches("www.");
        // A blocked domain also blocks every subdomain
        let mut candidate = host;
        loop {
            if self.blocked_domains.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest,
                _ => return false,
            }
        }
    }

    pub fn scan(&self, raw: &str) -> SecurityScan {
        let mut threats = Vec::new();

        match Url::parse(raw) {
            Ok(url) => {
                if !matches!(url.scheme(), "http" | "https") {
                    threats.push(format!("unsupported scheme '{}'", url.scheme()));
                }

                if !url.username().is_empty() || url.password().is_some() {
                    threats.push("credentials embedded in URL".to_string());
                }

                match url.host_str() {
                    Some(host) => {
                        let host = host.to_ascii_lowercase();
                        let bare = host.trim_start_matches('[').trim_end_matches(']');

                        if self.is_blocked(&host) {
                            threats.push(format!("blocked domain '{host}'"));
                        }
                        if bare.parse::<IpAddr>().is_ok() {
                            threats.push("IP address used as host".to_string());
                        }
                        if let Some(tld) = host.rsplit('.').next() {
                            if SUSPICIOUS_TLDS.contains(&tld) {
                                threats.push(format!("suspicious top-level domain '.{tld}'"));
                            }
                        }
                        if host.split('.').count() > MAX_SUBDOMAIN_DEPTH + 1 {
                            threats.push("excessive subdomain depth".to_string());
                        }
                    }
                    None => threats.push("missing host".to_string()),
                }

                let lowered = raw.to_ascii_lowercase();
                threats.extend(
                    PHISHING_KEYWORDS
                        .iter()
                        .filter(|k| lowered.contains(*k))
                        .map(|k| format!("phishing keyword '{k}'")),
                );
            }
            Err(e) => threats.push(format!("malformed URL: {e}")),
        }

        SecurityScan {
            safe: threats.is_empty(),
            threats,
            scanned_at: now_millis(),
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted limiter state: timestamps (epoch ms) of recent requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    #[serde(default)]
    pub requests: Vec<i64>,
}

impl RateLimitState {
    /// Accepts both the current object form and the bare timestamp array
    /// written by older versions
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Self {
                requests: items.iter().filter_map(Value::as_i64).collect(),
            },
            other => serde_json::from_value(other).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: usize },
    Limited { retry_after_ms: i64 },
}

/// Sliding-window limiter; a pure function of its state and the clock
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    max_requests: usize,
    window_ms: i64,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window_ms: (window_secs as i64).saturating_mul(1000),
        }
    }

    /// Check a request at `now`, recording it in `state` when allowed
    pub fn check(&self, state: &mut RateLimitState, now: i64) -> RateDecision {
        let window_start = now - self.window_ms;
        state.requests.retain(|&t| t > window_start);

        if state.requests.len() >= self.max_requests {
            let oldest = state.requests.iter().copied().min().unwrap_or(now);
            return RateDecision::Limited {
                retry_after_ms: (oldest + self.window_ms - now).max(0),
            };
        }

        state.requests.push(now);
        RateDecision::Allowed {
            remaining: self.max_requests - state.requests.len(),
        }
    }
}

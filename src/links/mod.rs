pub mod password;
pub mod rate_limit;
pub mod scanner;
pub mod service;
pub mod shortcode;

pub use password::{hash_password, verify_password};
pub use rate_limit::{RateDecision, RateLimitState, RateLimiter};
pub use scanner::MalwareScanner;
pub use service::{
    AbTestRequest, ClickContext, LinkService, Resolution, ResolveError, SecurityStats,
    ShortenError, ShortenRequest, RATE_LIMIT_SETTING, SECURITY_STATS_SETTING,
};
pub use shortcode::{is_valid_alias, ShortCodeGenerator};

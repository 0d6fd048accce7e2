//! Click analytics
//!
//! Each link owns one aggregated record in the `analytics` partition, updated
//! on every tracked redirect. Raw click events stay on the link itself.

pub mod models;

pub use models::AnalyticsRecord;

pub mod analytics;
pub mod config;
pub mod links;
pub mod models;
pub mod storage;

pub mod aggregate;
pub mod batch;
pub mod budget_cache;
pub mod config;
pub mod derived;
pub mod error;
pub mod http_client;
pub mod insight_cache;
pub mod providers;
pub mod report;
pub mod taxonomy;

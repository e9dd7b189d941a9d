pub mod aggregate;
pub mod cache;
pub mod clean;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod export;
pub mod fetch;
pub mod http_client;
pub mod injuries;
pub mod injury_reports;
pub mod logging;
pub mod players;
pub mod rankings;
pub mod raw;
pub mod reports;
pub mod schema;
pub mod source_store;

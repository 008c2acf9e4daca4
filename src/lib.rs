// Access Key Gate
// Issues quota- and expiry-bound access keys and validates them

pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod security;
pub mod service;

// Re-export commonly used items
pub use config::AppConfig;
pub use database::Database;
pub use errors::ApiError;
pub use models::{AccessKey, UsageLogEntry, UNLIMITED_USES};
pub use service::AccessKeyService;

use std::fmt;

use crate::error::{AppError, Result};

pub const FINDING_API_URL: &str = "https://svcs.ebay.com/services/search/FindingService/v1";
pub const SHOPPING_API_URL: &str = "https://open.api.ebay.com/shopping";
pub const OAUTH_TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
pub const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

/// Shopping API compatibility level sent with every detail call.
pub const SHOPPING_API_VERSION: &str = "1199";

/// Listings requested per search page (the Finding API maximum).
pub const ENTRIES_PER_PAGE: u32 = 100;

/// GetMultipleItems accepts at most this many ids per call.
pub const MAX_DETAIL_BATCH: usize = 20;

/// Rows per insert statement group when appending to the sink.
pub const INSERT_CHUNK_SIZE: usize = 1000;

/// Timeout applied to every upstream HTTP call (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Text persisted in place of any field the upstream record did not carry.
pub const MISSING_SENTINEL: &str = "nan";

/// Developer keys file read at startup unless KEYS_FILE names another.
pub const KEYS_FILE: &str = "keys.env";

/// Load `KEY=value` lines from `path` into the process environment.
/// Variables already set win. A missing file is not an error; returns
/// whether a file was read.
pub fn load_keys_file(path: &str) -> Result<bool> {
    match dotenvy::from_filename(path) {
        Ok(_) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(AppError::Config(format!("cannot read {path}: {e}"))),
    }
}

/// Keys file path from KEYS_FILE, falling back to [`KEYS_FILE`].
pub fn keys_file_path() -> String {
    std::env::var("KEYS_FILE").unwrap_or_else(|_| KEYS_FILE.to_string())
}

/// Developer keys. Loaded once at process start and never logged.
#[derive(Clone, Default)]
pub struct Credentials {
    pub app_id: String,
    pub cert_id: String,
    /// Token shared with the platform for the account-deletion challenge.
    pub verification_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &"<redacted>")
            .field("cert_id", &"<redacted>")
            .field("verification_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub finding_api_url: String,
    pub shopping_api_url: String,
    pub oauth_token_url: String,
    pub log_level: String,
    pub db_path: String,
    /// Destination table for merged rows (TABLE_NAME)
    pub table_name: String,
    /// Overwritten with the last failure's details (FAILURE_LOG_PATH)
    pub failure_log_path: String,
    /// Category ids processed in order each cycle (CATEGORIES, comma-separated)
    pub categories: Vec<String>,
    /// Only listings started within this many hours are fetched (LOOKBACK_HOURS)
    pub lookback_hours: i64,
    /// Upper bound on search pages per category (SEARCH_MAX_PAGES)
    pub search_max_pages: u32,
    /// Ids per detail call, clamped to 1..=MAX_DETAIL_BATCH (DETAIL_BATCH_SIZE)
    pub detail_batch_size: usize,
    /// Detail calls allowed per cycle (DAILY_CALL_LIMIT)
    pub daily_call_limit: u32,
    pub webhook_port: u16,
    /// Public URL the platform calls; part of the challenge hash (WEBHOOK_ENDPOINT)
    pub webhook_endpoint: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            credentials: Credentials {
                app_id: std::env::var("EBAY_APP_ID").unwrap_or_default(),
                cert_id: std::env::var("EBAY_CERT_ID").unwrap_or_default(),
                verification_token: std::env::var("EBAY_VERIFICATION_TOKEN").unwrap_or_default(),
            },
            finding_api_url: std::env::var("FINDING_API_URL")
                .unwrap_or_else(|_| FINDING_API_URL.to_string()),
            shopping_api_url: std::env::var("SHOPPING_API_URL")
                .unwrap_or_else(|_| SHOPPING_API_URL.to_string()),
            oauth_token_url: std::env::var("OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| OAUTH_TOKEN_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "ebay.db".to_string()),
            table_name: std::env::var("TABLE_NAME").unwrap_or_else(|_| "item_specs".to_string()),
            failure_log_path: std::env::var("FAILURE_LOG_PATH")
                .unwrap_or_else(|_| "pipeline_failure.log".to_string()),
            categories: parse_list(&std::env::var("CATEGORIES").unwrap_or_default()),
            lookback_hours: std::env::var("LOOKBACK_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse::<i64>()
                .map_err(|_| AppError::Config("LOOKBACK_HOURS must be an integer".to_string()))?,
            search_max_pages: std::env::var("SEARCH_MAX_PAGES")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<u32>()
                .unwrap_or(1)
                .max(1),
            detail_batch_size: std::env::var("DETAIL_BATCH_SIZE")
                .unwrap_or_else(|_| MAX_DETAIL_BATCH.to_string())
                .parse::<usize>()
                .unwrap_or(MAX_DETAIL_BATCH)
                .clamp(1, MAX_DETAIL_BATCH),
            daily_call_limit: std::env::var("DAILY_CALL_LIMIT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<u32>()
                .unwrap_or(5000),
            webhook_port: std::env::var("WEBHOOK_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("WEBHOOK_PORT must be a valid port number".to_string()))?,
            webhook_endpoint: std::env::var("WEBHOOK_ENDPOINT").unwrap_or_default(),
        })
    }

    /// Checks the settings the fetch cycle cannot run without.
    pub fn validate_pipeline(&self) -> Result<()> {
        if self.credentials.app_id.is_empty() || self.credentials.cert_id.is_empty() {
            return Err(AppError::Config("EBAY_APP_ID and EBAY_CERT_ID must be set".to_string()));
        }
        if self.categories.is_empty() {
            return Err(AppError::Config("CATEGORIES must list at least one category id".to_string()));
        }
        if self.lookback_hours <= 0 {
            return Err(AppError::Config("LOOKBACK_HOURS must be positive".to_string()));
        }
        Ok(())
    }

    /// Checks the settings the deletion webhook cannot run without.
    pub fn validate_webhook(&self) -> Result<()> {
        if self.credentials.verification_token.is_empty() {
            return Err(AppError::Config("EBAY_VERIFICATION_TOKEN must be set".to_string()));
        }
        if self.webhook_endpoint.is_empty() {
            return Err(AppError::Config("WEBHOOK_ENDPOINT must be set".to_string()));
        }
        Ok(())
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fully populated config pointing at production URLs; tests override what they need.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        credentials: Credentials {
            app_id: "test-app".to_string(),
            cert_id: "test-cert".to_string(),
            verification_token: "test-verification-token".to_string(),
        },
        finding_api_url: FINDING_API_URL.to_string(),
        shopping_api_url: SHOPPING_API_URL.to_string(),
        oauth_token_url: OAUTH_TOKEN_URL.to_string(),
        log_level: "info".to_string(),
        db_path: "ebay.db".to_string(),
        table_name: "item_specs".to_string(),
        failure_log_path: "pipeline_failure.log".to_string(),
        categories: vec!["37908".to_string()],
        lookback_hours: 24,
        search_max_pages: 1,
        detail_batch_size: MAX_DETAIL_BATCH,
        daily_call_limit: 5000,
        webhook_port: 8080,
        webhook_endpoint: "https://hooks.example.com/marketplace-account-deletion".to_string(),
    }
}

use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A mandatory key was absent from a detail item. Rows without it can't be joined.
    #[error("Missing mandatory field `{field}` in detail group {group}, item {index}")]
    MissingKey {
        field: &'static str,
        group: usize,
        index: usize,
    },

    #[error("Listing/detail tables are misaligned: {listings} listings vs {details} details")]
    Alignment { listings: usize, details: usize },

    #[error("Item {0} has no counterpart on the other side of the join")]
    UnmatchedItem(String),

    #[error("Item {0} appears more than once in the detail responses")]
    DuplicateItem(String),

    #[error("Daily call limit of {limit} reached")]
    QuotaExhausted { limit: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for failures that mean the upstream could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            AppError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Config(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

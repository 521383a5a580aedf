use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::Config;
use crate::error::AppError;

pub const DELETION_PATH: &str = "/marketplace-account-deletion";

#[derive(Clone)]
pub struct WebhookState {
    pub verification_token: String,
    /// Public URL of the deletion endpoint, exactly as registered upstream.
    pub endpoint: String,
}

impl WebhookState {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            verification_token: cfg.credentials.verification_token.clone(),
            endpoint: cfg.webhook_endpoint.clone(),
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(DELETION_PATH, get(answer_challenge).post(acknowledge_deletion))
        .route("/health", get(health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ChallengeQuery {
    pub challenge_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge_response: String,
}

/// Only the fields we log. The user data in the payload is never read.
#[derive(Deserialize)]
pub struct DeletionNotice {
    pub notification: NoticeHeader,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeHeader {
    pub notification_id: String,
    pub event_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// SHA-256 hex of challenge code, verification token and endpoint, concatenated in that order.
pub fn challenge_response(challenge_code: &str, verification_token: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_code.as_bytes());
    hasher.update(verification_token.as_bytes());
    hasher.update(endpoint.as_bytes());
    hex::encode(hasher.finalize())
}

async fn answer_challenge(
    State(state): State<WebhookState>,
    Query(q): Query<ChallengeQuery>,
) -> Result<Json<ChallengeResponse>, AppError> {
    let code = q
        .challenge_code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("challenge_code is required".to_string()))?;

    info!("Answering endpoint validation challenge");
    Ok(Json(ChallengeResponse {
        challenge_response: challenge_response(&code, &state.verification_token, &state.endpoint),
    }))
}

async fn acknowledge_deletion(Json(notice): Json<DeletionNotice>) -> StatusCode {
    info!(
        notification_id = %notice.notification.notification_id,
        event_date = notice.notification.event_date.as_deref().unwrap_or("unknown"),
        "account deletion notice received"
    );
    StatusCode::OK
}

async fn health() -> &'static str {
    "ok"
}

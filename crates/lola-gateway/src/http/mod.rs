pub mod chat;
pub mod health;
pub mod meta;
pub mod payments;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

/// Body returned to webhook providers once a delivery has been taken.
pub(crate) fn ack() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub(crate) fn auth_error(reason: &str) -> (StatusCode, Json<Value>) {
    warn!(reason = %reason, "webhook authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication failed", "reason": reason})),
    )
}

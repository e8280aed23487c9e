//! Web demo chat: POST /api/chat
//!
//! Request:  `{"message": "hola", "session_id": "…", "reset": false}`
//! Response: `{"reply": "...", "chunks": ["..."], "session_id": "..."}`
//! Error:    `{"error": "...", "code": "..."}`
//!
//! Conversations are kept per `session_id` under the `demo` context, apart
//! from any channel conversation. A missing id starts a new session.

use axum::{extract::State, http::StatusCode, Json};
use lola_core::{Correspondent, LolaError};
use lola_sessions::{SessionKey, DEMO_CONTEXT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub session_id: Option<String>,
    /// Forget the session's history before answering.
    #[serde(default)]
    pub reset: bool,
}

#[derive(Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub chunks: Vec<String>,
    pub session_id: String,
}

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<Value>)> {
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let visitor = Correspondent::web(session_id.clone());

    if req.reset {
        let cleared = state
            .pipeline
            .reset_history(&SessionKey::new(visitor.clone(), DEMO_CONTEXT));
        info!(session_id = %session_id, cleared, "demo session reset");
        if req.message.trim().is_empty() {
            return Ok(Json(ChatReply {
                reply: String::new(),
                chunks: Vec::new(),
                session_id,
            }));
        }
    }

    match state
        .pipeline
        .reply_once(&visitor, DEMO_CONTEXT, &req.message)
        .await
    {
        Ok(reply) => Ok(Json(ChatReply {
            reply: reply.reply,
            chunks: reply.chunks,
            session_id,
        })),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "POST /api/chat failed");
            let status = match &e {
                LolaError::Validation(_) => StatusCode::BAD_REQUEST,
                LolaError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            Err((status, Json(json!({"error": e.to_string(), "code": e.code()}))))
        }
    }
}

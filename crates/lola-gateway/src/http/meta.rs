//! Meta webhooks: WhatsApp Cloud API (`/webhook`) and Instagram
//! Messaging (`/ig-webhook`).
//!
//! GET answers the `hub.challenge` subscription handshake. POST verifies
//! `X-Hub-Signature-256` when an app secret is configured, normalises the
//! payload and hands every event to the pipeline. Deliveries are
//! acknowledged right away; replies go out from the flush tasks.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use lola_core::InboundEvent;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ack, auth_error};
use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET /webhook
pub async fn whatsapp_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> Result<String, (StatusCode, &'static str)> {
    let Some(wa) = &state.config.channels.whatsapp else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "whatsapp not configured"));
    };
    answer_challenge("whatsapp", &wa.verify_token, params)
}

/// GET /ig-webhook
pub async fn instagram_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> Result<String, (StatusCode, &'static str)> {
    let Some(ig) = &state.config.channels.instagram else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "instagram not configured"));
    };
    answer_challenge("instagram", &ig.verify_token, params)
}

fn answer_challenge(
    channel: &str,
    expected: &str,
    params: VerifyParams,
) -> Result<String, (StatusCode, &'static str)> {
    let subscribing = params.mode.as_deref() == Some("subscribe");
    let token_ok = params.verify_token.as_deref() == Some(expected);
    if subscribing && token_ok {
        info!(channel, "webhook subscription verified");
        Ok(params.challenge.unwrap_or_default())
    } else {
        warn!(channel, mode = ?params.mode, "webhook verification failed");
        Err((StatusCode::FORBIDDEN, "verification failed"))
    }
}

/// POST /webhook
pub async fn whatsapp_incoming(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(wa) = &state.config.channels.whatsapp else {
        return Ok(ack());
    };
    let Some(payload) = authenticate(&headers, &body, wa.app_secret.as_deref())? else {
        return Ok(ack());
    };

    let events = lola_channels::whatsapp::parse_webhook(&payload, &state.quotes);
    ingest_all(&state, "whatsapp", events);
    Ok(ack())
}

/// POST /ig-webhook
pub async fn instagram_incoming(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(ig) = &state.config.channels.instagram else {
        return Ok(ack());
    };
    let Some(payload) = authenticate(&headers, &body, ig.app_secret.as_deref())? else {
        return Ok(ack());
    };

    let events = lola_channels::instagram::parse_webhook(&payload, state.instagram_id());
    ingest_all(&state, "instagram", events);
    Ok(ack())
}

/// Check the signature (when a secret is set) and parse the body.
/// `Ok(None)` means "acknowledge and ignore" (unparseable JSON).
fn authenticate(
    headers: &HeaderMap,
    body: &Bytes,
    app_secret: Option<&str>,
) -> Result<Option<Value>, (StatusCode, Json<Value>)> {
    if let Some(secret) = app_secret.filter(|s| !s.is_empty()) {
        verify_hub_signature(headers, body, secret).map_err(|e| auth_error(&e))?;
    }
    match serde_json::from_slice(body) {
        Ok(payload) => Ok(Some(payload)),
        Err(e) => {
            warn!(error = %e, "invalid JSON in webhook body");
            Ok(None)
        }
    }
}

fn ingest_all(state: &AppState, channel: &str, events: Vec<InboundEvent>) {
    if events.is_empty() {
        debug!(channel, "webhook carried no messages");
        return;
    }
    for event in events {
        let kind = event.payload.kind();
        let from = event.correspondent.address.clone();
        let outcome = state.pipeline.ingest(event);
        debug!(channel, from = %from, kind, ?outcome, "inbound event");
    }
}

/// Verify Meta's `sha256=<hex>` signature in X-Hub-Signature-256.
fn verify_hub_signature(headers: &HeaderMap, body: &Bytes, secret: &str) -> Result<(), String> {
    let sig_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Hub-Signature-256 header".to_string())?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;

    let expected =
        hex::decode(sig_hex).map_err(|_| "X-Hub-Signature-256 is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "signature mismatch".to_string())
}

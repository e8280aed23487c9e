//! MercadoPago routes.
//!
//! - `POST /mp-webhook`: provider notifications
//! - `GET  /api/mp/plans`: checkout link per configured plan
//! - `GET  /api/mp/subscribers`: subscriber table (admin)
//! - `POST /api/mp/cancel`: cancel a subscription by `mp_id` or `email` (admin)
//!
//! Admin routes require `Authorization: Bearer <gateway.admin_token>` when
//! a token is configured.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use lola_core::LolaError;
use lola_payments::{verify_signature, CancelTarget, MercadoPagoClient, Notification, PaymentError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ack, auth_error};
use crate::app::AppState;

/// POST /mp-webhook
///
/// Verifies `x-signature` when a webhook secret is configured, then looks
/// the notified resource up in the background so the provider gets its 200
/// without waiting on our outbound calls.
pub async fn mp_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(mp) = state.mercadopago.clone() else {
        debug!("payment notification ignored, payments not configured");
        return Ok(ack());
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "invalid JSON in payment notification");
            return Ok(ack());
        }
    };
    let Some(notification) = Notification::from_body(&payload) else {
        debug!("payment notification without data id");
        return Ok(ack());
    };

    if let Some(secret) = mp.webhook_secret() {
        verify_signature(
            secret,
            header(&headers, "x-signature"),
            header(&headers, "x-request-id"),
            &notification.data_id,
        )
        .map_err(|e| auth_error(&e.to_string()))?;
    }

    info!(
        action = %notification.action,
        kind = %notification.kind,
        data_id = %notification.data_id,
        "payment notification"
    );
    tokio::spawn(async move {
        if let Err(e) = mp.handle_notification(&notification).await {
            warn!(data_id = %notification.data_id, error = %e, "payment notification handling failed");
        }
    });
    Ok(ack())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

type ApiError = (StatusCode, Json<Value>);

/// GET /api/mp/plans
pub async fn plans_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mp = configured(&state)?;
    let plans: serde_json::Map<String, Value> = mp
        .plans()
        .into_iter()
        .map(|(name, link)| (name, json!({"init_point": link})))
        .collect();
    Ok(Json(Value::Object(plans)))
}

/// GET /api/mp/subscribers
pub async fn subscribers_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let mp = configured(&state)?;
    let subscribers = mp.store().list().map_err(payment_error)?;
    Ok(Json(json!({
        "count": subscribers.len(),
        "subscribers": subscribers,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub mp_id: String,
    #[serde(default)]
    pub email: String,
}

/// POST /api/mp/cancel
///
/// `mp_id` wins over `email` when both are given.
pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Value>, ApiError> {
    check_admin(&state, &headers)?;
    let mp = configured(&state)?;

    let target = match (req.mp_id.trim(), req.email.trim()) {
        ("", "") => {
            let e = LolaError::Validation("mp_id or email is required".to_string());
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": e.to_string(), "code": e.code()})),
            ));
        }
        ("", email) => CancelTarget::Email(email.to_string()),
        (mp_id, _) => CancelTarget::Preapproval(mp_id.to_string()),
    };

    let mp_id = mp.cancel_subscription(&target).await.map_err(|e| {
        warn!(?target, error = %e, "subscription cancel failed");
        payment_error(e)
    })?;
    Ok(Json(json!({"ok": true, "status": "cancelled", "mp_id": mp_id})))
}

fn configured(state: &AppState) -> Result<&MercadoPagoClient, ApiError> {
    state.mercadopago.as_deref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "MercadoPago not configured"})),
        )
    })
}

fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.gateway.admin_token.as_deref().filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let token = header(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| auth_error("missing bearer token"))?;
    if token == expected {
        Ok(())
    } else {
        Err(auth_error("bearer token mismatch"))
    }
}

fn payment_error(e: PaymentError) -> ApiError {
    let status = match &e {
        PaymentError::UnknownSubscriber(_) => StatusCode::NOT_FOUND,
        PaymentError::Api { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        PaymentError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    let e = LolaError::Payment(e.to_string());
    (status, Json(json!({"error": e.to_string(), "code": e.code()})))
}

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness check with channel and store summaries.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let subscribers = state
        .mercadopago
        .as_ref()
        .and_then(|mp| mp.store().count().ok());

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": state.channels.enabled(),
        "payments": state.mercadopago.is_some(),
        "subscribers": subscribers,
        "pipeline": state.pipeline.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lola_core::LolaConfig;

    use crate::http::testing::{body_json, router, send};

    #[tokio::test]
    async fn reports_status_and_empty_stores() {
        let resp = send(
            router(LolaConfig::default()),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["payments"], false);
        assert_eq!(body["channels"].as_array().map(Vec::len), Some(0));
        assert_eq!(body["pipeline"]["sessions"], 0);
        assert!(body["subscribers"].is_null());
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use lola_channels::{ChannelManager, QuoteCache};
use lola_core::LolaConfig;
use lola_dispatch::Pipeline;
use lola_payments::MercadoPagoClient;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: LolaConfig,
    pub pipeline: Arc<Pipeline>,
    pub channels: Arc<ChannelManager>,
    /// WhatsApp message id → text, for quote-reply context.
    pub quotes: Arc<QuoteCache>,
    pub mercadopago: Option<Arc<MercadoPagoClient>>,
}

impl AppState {
    pub fn new(
        config: LolaConfig,
        pipeline: Arc<Pipeline>,
        channels: Arc<ChannelManager>,
        quotes: Arc<QuoteCache>,
        mercadopago: Option<Arc<MercadoPagoClient>>,
    ) -> Self {
        Self {
            config,
            pipeline,
            channels,
            quotes,
            mercadopago,
        }
    }

    /// Our own Instagram account id, used to skip echoes.
    pub fn instagram_id(&self) -> &str {
        self.config
            .channels
            .instagram
            .as_ref()
            .map(|ig| ig.ig_user_id.as_str())
            .unwrap_or_default()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/webhook",
            get(crate::http::meta::whatsapp_verify).post(crate::http::meta::whatsapp_incoming),
        )
        .route(
            "/ig-webhook",
            get(crate::http::meta::instagram_verify).post(crate::http::meta::instagram_incoming),
        )
        .route("/mp-webhook", post(crate::http::payments::mp_webhook))
        .route("/api/mp/plans", get(crate::http::payments::plans_handler))
        .route("/api/mp/subscribers", get(crate::http::payments::subscribers_handler))
        .route("/api/mp/cancel", post(crate::http::payments::cancel_handler))
        .route("/api/chat", post(crate::http::chat::chat_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Periodically purge idle histories and expired dedup ids.
pub fn spawn_sweeper(pipeline: Arc<Pipeline>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (sessions, ids) = pipeline.sweep();
            debug!(sessions, ids, "sweep tick");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lola_core::Correspondent;
    use lola_sessions::DEMO_CONTEXT;

    use crate::http::testing::state;

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_idle_sessions() {
        let state = state(LolaConfig::default());
        state
            .pipeline
            .reply_once(&Correspondent::web("s-1"), DEMO_CONTEXT, "hola")
            .await
            .unwrap();
        assert_eq!(state.pipeline.stats().sessions, 1);

        let sweeper = spawn_sweeper(state.pipeline.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(29 * 60)).await;
        assert_eq!(state.pipeline.stats().sessions, 1);

        tokio::time::sleep(Duration::from_secs(3 * 60)).await;
        assert_eq!(state.pipeline.stats().sessions, 0);
        sweeper.abort();
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lola_agent::{GeminiProvider, LlmProvider, OpenAiProvider, ProviderRouter, ProviderSlot};
use lola_channels::{ChannelManager, InstagramChannel, QuoteCache, WhatsAppChannel};
use lola_core::LolaConfig;
use lola_payments::{MercadoPagoClient, PaymentProvider, SubscriberStore};
use tracing::{info, warn};

mod app;
mod http;

#[derive(Parser)]
#[command(name = "lola-gateway")]
#[command(about = "Lola: WhatsApp/Instagram sales assistant backend", long_about = None)]
struct Cli {
    /// Path to lola.toml (default: ~/.lola/lola.toml)
    #[arg(long, env = "LOLA_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lola_gateway=info,lola_dispatch=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = LolaConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        LolaConfig::default()
    });

    // channel adapters: absent sections leave the channel disabled
    let quotes = Arc::new(QuoteCache::default());
    let mut channels = ChannelManager::new();
    if let Some(ref wa) = config.channels.whatsapp {
        channels.register(Arc::new(WhatsAppChannel::new(wa.clone(), quotes.clone())));
    }
    if let Some(ref ig) = config.channels.instagram {
        let adapter = InstagramChannel::new(ig.clone());
        info!(account = %adapter.own_id(), "Instagram account configured");
        channels.register(Arc::new(adapter));
    }
    let channels = Arc::new(channels);
    if channels.enabled().is_empty() {
        warn!("no chat channel configured; only the web demo chat is served");
    }

    // completion service
    let provider = build_provider(&config);
    let system = lola_agent::prompt::load_system_prompt(config.agent.system_prompt_path.as_deref());
    let completer = Arc::new(lola_agent::Completer::new(
        provider,
        system,
        config.agent.model.clone(),
        config.agent.max_tokens,
        Duration::from_secs(config.agent.timeout_secs),
    ));

    // payments + subscriber table
    let mercadopago = match config.payments.mercadopago {
        Some(ref mp) => {
            info!(path = %config.database.path, "opening subscriber database");
            let store = Arc::new(SubscriberStore::open(&config.database.path)?);
            info!(subscribers = store.count()?, plans = mp.plans.len(), "MercadoPago enabled");
            if config.gateway.admin_token.is_none() {
                warn!("gateway.admin_token unset; /api/mp/subscribers and /api/mp/cancel are open");
            }
            Some(Arc::new(MercadoPagoClient::new(mp.clone(), store)))
        }
        None => {
            info!("MercadoPago not configured; payment directives resolve as unavailable");
            None
        }
    };
    let payments = mercadopago
        .clone()
        .map(|mp| mp as Arc<dyn PaymentProvider>);

    let pipeline = lola_dispatch::Pipeline::new(&config.pipeline, channels.clone(), completer, payments);
    app::spawn_sweeper(
        pipeline.clone(),
        Duration::from_secs(config.pipeline.sweep_interval_secs.max(1)),
    );

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(
        config,
        pipeline,
        channels,
        quotes,
        mercadopago,
    ));
    let router = app::build_router(state);

    info!("Lola gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Build the completion provider chain from config.
///
/// Priority order:
///   1. providers.gemini[*]  (one slot per API key, in declaration order)
///   2. providers.openai
///   3. Env var fallback (GEMINI_API_KEY) when nothing is configured
///
/// Slots are wrapped in a ProviderRouter so a failing, rate-limited or hung
/// key fails over to the next one. Each attempt gets
/// `agent.attempt_timeout_secs`, inside the overall `agent.timeout_secs`.
fn build_provider(config: &LolaConfig) -> Arc<dyn LlmProvider> {
    let mut slots: Vec<ProviderSlot> = Vec::new();
    let attempt = Duration::from_secs(config.agent.attempt_timeout_secs.max(1));

    for (i, gemini) in config.providers.gemini.iter().enumerate() {
        info!(
            "LLM provider slot[{}]: Gemini key #{} ({})",
            slots.len(),
            i + 1,
            gemini.base_url
        );
        slots.push(ProviderSlot::new(
            Box::new(GeminiProvider::new(
                format!("gemini-{}", i + 1),
                gemini.api_key.clone(),
                gemini.base_url.clone(),
                gemini.model.clone(),
            )
            .with_timeout(attempt)),
            0,
        )
        .with_attempt_timeout(attempt));
    }

    if let Some(ref openai) = config.providers.openai {
        info!("LLM provider slot[{}]: OpenAI ({})", slots.len(), openai.base_url);
        slots.push(ProviderSlot::new(
            Box::new(OpenAiProvider::new(
                openai.api_key.clone(),
                Some(openai.base_url.clone()),
                openai.model.clone(),
            )
            .with_timeout(attempt)),
            1,
        )
        .with_attempt_timeout(attempt));
    }

    if slots.is_empty() {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            info!("LLM provider: Gemini (from env)");
            slots.push(ProviderSlot::new(
                Box::new(GeminiProvider::new(
                    "gemini-env",
                    key,
                    "https://generativelanguage.googleapis.com".to_string(),
                    None,
                )
                .with_timeout(attempt)),
                0,
            )
            .with_attempt_timeout(attempt));
        } else {
            warn!("no LLM provider configured; every turn will get the apology reply");
        }
    }

    Arc::new(ProviderRouter::new(slots))
}

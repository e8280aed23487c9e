use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v23.0";
pub const DEFAULT_MERCADOPAGO_BASE_URL: &str = "https://api.mercadopago.com";

pub const DEBOUNCE_MS: u64 = 5_000; // anchored to the first event of a burst
pub const DEDUP_TTL_SECS: u64 = 120;
pub const HISTORY_MAX_TURNS: usize = 20;
pub const HISTORY_TTL_SECS: u64 = 30 * 60;
pub const PACING_MS: u64 = 800;
pub const SWEEP_INTERVAL_SECS: u64 = 60;
pub const COMPLETION_TIMEOUT_SECS: u64 = 30;
pub const PROVIDER_ATTEMPT_TIMEOUT_SECS: u64 = 12;

/// Top-level config (lola.toml + LOLA_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LolaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token for the subscriber admin routes. Unset leaves them open.
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Replaces the built-in sales prompt when set.
    pub system_prompt_path: Option<String>,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    /// Budget for one provider attempt; a key that exceeds it is abandoned
    /// and the next one tried, all within `timeout_secs`.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt_path: None,
            timeout_secs: COMPLETION_TIMEOUT_SECS,
            attempt_timeout_secs: PROVIDER_ATTEMPT_TIMEOUT_SECS,
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// One entry per API key; tried in declaration order.
    #[serde(default)]
    pub gemini: Vec<GeminiConfig>,
    pub openai: Option<OpenAiProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    /// Overrides `agent.model` for this key.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub whatsapp: Option<WhatsAppConfig>,
    pub instagram: Option<InstagramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    /// Token echoed back during the `hub.challenge` handshake.
    pub verify_token: String,
    /// When set, `X-Hub-Signature-256` is required on every delivery.
    pub app_secret: Option<String>,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    pub access_token: String,
    pub ig_user_id: String,
    pub verify_token: String,
    pub app_secret: Option<String>,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentsConfig {
    pub mercadopago: Option<MercadoPagoConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    /// Secret for the `x-signature` header on payment notifications.
    pub webhook_secret: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Public origin used for back URLs and the notification URL.
    pub public_base_url: Option<String>,
    #[serde(default = "default_mercadopago_base_url")]
    pub api_base_url: String,
    /// Subscription plans keyed by lowercase name (e.g. "basico", "pro").
    #[serde(default)]
    pub plans: HashMap<String, PlanConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanConfig {
    /// Provider-side preapproval plan id; used to name incoming subscriptions.
    pub id: Option<String>,
    /// Checkout link handed to the correspondent.
    pub init_point: Option<String>,
}

/// Timing and capacity knobs for the aggregation/dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_history_max")]
    pub history_max_turns: usize,
    #[serde(default = "default_history_ttl")]
    pub history_ttl_secs: u64,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEBOUNCE_MS,
            dedup_ttl_secs: DEDUP_TTL_SECS,
            history_max_turns: HISTORY_MAX_TURNS,
            history_ttl_secs: HISTORY_TTL_SECS,
            pacing_ms: PACING_MS,
            sweep_interval_secs: SWEEP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_completion_timeout() -> u64 {
    COMPLETION_TIMEOUT_SECS
}
fn default_attempt_timeout() -> u64 {
    PROVIDER_ATTEMPT_TIMEOUT_SECS
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_graph_base_url() -> String {
    DEFAULT_GRAPH_BASE_URL.to_string()
}
fn default_currency() -> String {
    "UYU".to_string()
}
fn default_mercadopago_base_url() -> String {
    DEFAULT_MERCADOPAGO_BASE_URL.to_string()
}
fn default_debounce_ms() -> u64 {
    DEBOUNCE_MS
}
fn default_dedup_ttl() -> u64 {
    DEDUP_TTL_SECS
}
fn default_history_max() -> usize {
    HISTORY_MAX_TURNS
}
fn default_history_ttl() -> u64 {
    HISTORY_TTL_SECS
}
fn default_pacing_ms() -> u64 {
    PACING_MS
}
fn default_sweep_interval() -> u64 {
    SWEEP_INTERVAL_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lola/lola.db", home)
}

impl LolaConfig {
    /// Load config from a TOML file with LOLA_* env var overrides.
    ///
    /// Nested keys use a double underscore: `LOLA_PIPELINE__DEBOUNCE_MS=3000`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::LolaError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LOLA_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lola/lola.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config: LolaConfig = LolaConfig::figment("missing.toml").extract()?;
            assert_eq!(config.gateway.port, DEFAULT_PORT);
            assert_eq!(config.pipeline.debounce_ms, 5_000);
            assert_eq!(config.pipeline.history_max_turns, 20);
            assert!(config.agent.attempt_timeout_secs < config.agent.timeout_secs);
            assert!(config.gateway.admin_token.is_none());
            assert!(config.channels.whatsapp.is_none());
            assert!(config.payments.mercadopago.is_none());
            Ok(())
        });
    }

    #[test]
    fn toml_sections_and_env_overrides_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "lola.toml",
                r#"
                [channels.whatsapp]
                access_token = "tok"
                phone_number_id = "123"
                verify_token = "verify"

                [payments.mercadopago]
                access_token = "mp"

                [payments.mercadopago.plans.basico]
                init_point = "https://mp/basico"
                "#,
            )?;
            jail.set_env("LOLA_PIPELINE__DEBOUNCE_MS", "3000");

            let config: LolaConfig = LolaConfig::figment("lola.toml").extract()?;
            let wa = config.channels.whatsapp.expect("whatsapp section");
            assert_eq!(wa.phone_number_id, "123");
            assert_eq!(wa.graph_base_url, DEFAULT_GRAPH_BASE_URL);

            let mp = config.payments.mercadopago.expect("mercadopago section");
            assert_eq!(mp.currency, "UYU");
            assert_eq!(
                mp.plans["basico"].init_point.as_deref(),
                Some("https://mp/basico")
            );

            assert_eq!(config.pipeline.debounce_ms, 3000);
            Ok(())
        });
    }
}

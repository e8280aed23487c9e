use std::time::Duration;

use async_trait::async_trait;
use lola_core::config::InstagramConfig;
use lola_core::{ChannelKind, Correspondent, InboundEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::ChannelError;

const SEND_TIMEOUT_MS: u64 = 30_000;
const TYPING_TIMEOUT_MS: u64 = 10_000;

/// Instagram Messaging adapter (Graph `/{ig_user_id}/messages`).
///
/// Text only: inbound media is not forwarded, so `fetch_media` keeps the
/// trait default.
pub struct InstagramChannel {
    client: reqwest::Client,
    config: InstagramConfig,
}

impl InstagramChannel {
    pub fn new(config: InstagramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Our own account id; deliveries sent by it are echoes.
    pub fn own_id(&self) -> &str {
        &self.config.ig_user_id
    }

    async fn post_messages(&self, body: &Value, timeout_ms: u64) -> Result<Value, ChannelError> {
        let url = format!(
            "{}/{}/messages",
            self.config.graph_base_url.trim_end_matches('/'),
            self.config.ig_user_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .timeout(Duration::from_millis(timeout_ms))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::from_transport(e, timeout_ms))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChannelError::AuthFailed(resp.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!("{status}: {text}")));
        }
        resp.json()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl Channel for InstagramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Instagram
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<Option<String>, ChannelError> {
        let body = json!({
            "recipient": { "id": recipient },
            "message": { "text": text },
        });
        let reply = self.post_messages(&body, SEND_TIMEOUT_MS).await?;
        let sent_id = reply["message_id"].as_str().map(String::from);
        debug!(to = %recipient, message_id = ?sent_id, "instagram message sent");
        Ok(sent_id)
    }

    async fn signal_typing(
        &self,
        recipient: &str,
        _in_reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        let body = json!({
            "recipient": { "id": recipient },
            "sender_action": "typing_on",
        });
        self.post_messages(&body, TYPING_TIMEOUT_MS).await.map(|_| ())
    }
}

/// Normalise an Instagram messaging webhook delivery into inbound events.
///
/// Only non-empty text messages are kept. Messages whose sender is
/// `own_id` (echoes of what we sent) are dropped.
pub fn parse_webhook(body: &Value, own_id: &str) -> Vec<InboundEvent> {
    let envelope: Envelope = match serde_json::from_value(body.clone()) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "unrecognised instagram webhook body");
            return Vec::new();
        }
    };

    envelope
        .entry
        .into_iter()
        .flat_map(|e| e.messaging)
        .filter_map(|m| {
            let sender = m.sender?.id;
            if sender.is_empty() || sender == own_id {
                return None;
            }
            let message = m.message?;
            if message.is_echo {
                return None;
            }
            let text = message.text.filter(|t| !t.is_empty())?;
            Some(InboundEvent::text(
                Correspondent::instagram(sender),
                message.mid.as_deref().filter(|id| !id.is_empty()),
                &text,
            ))
        })
        .collect()
}

// Webhook payload types (private, deserialization only)

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    messaging: Vec<Messaging>,
}

#[derive(Deserialize)]
struct Messaging {
    sender: Option<Party>,
    message: Option<IgMessage>,
}

#[derive(Deserialize)]
struct Party {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize)]
struct IgMessage {
    mid: Option<String>,
    text: Option<String>,
    #[serde(default)]
    is_echo: bool,
}

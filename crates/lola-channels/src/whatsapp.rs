use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lola_core::config::WhatsAppConfig;
use lola_core::{Attachment, ChannelKind, Correspondent, EventPayload, InboundEvent, MediaKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::quote::QuoteCache;

const SEND_TIMEOUT_MS: u64 = 30_000;
const TYPING_TIMEOUT_MS: u64 = 10_000;
const MEDIA_LOOKUP_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_MEDIA_MIME: &str = "audio/ogg";

/// WhatsApp Cloud API adapter (Graph `/{phone_number_id}/messages`).
pub struct WhatsAppChannel {
    client: reqwest::Client,
    config: WhatsAppConfig,
    quotes: Arc<QuoteCache>,
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig, quotes: Arc<QuoteCache>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            quotes,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.graph_base_url.trim_end_matches('/'),
            self.config.phone_number_id
        )
    }

    async fn post_messages(&self, body: &Value, timeout_ms: u64) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.messages_url())
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
impl Channel for WhatsAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<Option<String>, ChannelError> {
        let reply = self
            .post_messages(&text_body(recipient, text), SEND_TIMEOUT_MS)
            .await?;
        let sent_id = reply["messages"][0]["id"].as_str().map(String::from);
        if let Some(id) = &sent_id {
            self.quotes.record(id, text);
        }
        debug!(to = %recipient, message_id = ?sent_id, "whatsapp message sent");
        Ok(sent_id)
    }

    async fn signal_typing(
        &self,
        _recipient: &str,
        in_reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        // The indicator is attached to an inbound message and also marks it read.
        let Some(message_id) = in_reply_to.filter(|id| !id.is_empty()) else {
            return Ok(());
        };
        self.post_messages(&typing_body(message_id), TYPING_TIMEOUT_MS)
            .await
            .map(|_| ())
    }

    async fn fetch_media(&self, media_id: &str) -> Result<Attachment, ChannelError> {
        let lookup_url = format!(
            "{}/{}",
            self.config.graph_base_url.trim_end_matches('/'),
            media_id
        );
        let info: MediaInfo = self
            .client
            .get(&lookup_url)
            .bearer_auth(&self.config.access_token)
            .timeout(Duration::from_millis(MEDIA_LOOKUP_TIMEOUT_MS))
            .send()
            .await
            .map_err(|e| ChannelError::from_transport(e, MEDIA_LOOKUP_TIMEOUT_MS))?
            .error_for_status()
            .map_err(|e| ChannelError::MediaUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChannelError::MediaUnavailable(e.to_string()))?;

        let url = info
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ChannelError::MediaUnavailable(format!("no url for media {media_id}")))?;

        let data = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .timeout(Duration::from_millis(SEND_TIMEOUT_MS))
            .send()
            .await
            .map_err(|e| ChannelError::from_transport(e, SEND_TIMEOUT_MS))?
            .error_for_status()
            .map_err(|e| ChannelError::MediaUnavailable(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ChannelError::MediaUnavailable(e.to_string()))?;

        debug!(media_id, bytes = data.len(), "whatsapp media downloaded");
        Ok(Attachment {
            mime_type: info
                .mime_type
                .unwrap_or_else(|| DEFAULT_MEDIA_MIME.to_string()),
            data: data.to_vec(),
        })
    }
}

fn text_body(to: &str, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": { "body": text },
    })
}

fn typing_body(message_id: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
        "typing_indicator": { "type": "text" },
    })
}

/// Normalise a WhatsApp Cloud API webhook delivery into inbound events.
///
/// Unsupported message types and messages without a sender are skipped.
/// Inbound texts are recorded in `quotes`; a text that quotes a known
/// message gets the `[respondiendo a: "…"]` prefix.
pub fn parse_webhook(body: &Value, quotes: &QuoteCache) -> Vec<InboundEvent> {
    let envelope: Envelope = match serde_json::from_value(body.clone()) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "unrecognised whatsapp webhook body");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    for message in envelope
        .entry
        .into_iter()
        .flat_map(|e| e.changes)
        .flat_map(|c| c.value.messages)
    {
        if message.from.is_empty() {
            continue;
        }
        let message_id = Some(message.id.clone()).filter(|id| !id.is_empty());

        let payload = match message.kind.as_str() {
            "text" => {
                let Some(body) = message.text.map(|t| t.body).filter(|b| !b.is_empty()) else {
                    continue;
                };
                if let Some(id) = &message_id {
                    quotes.record(id, &body);
                }
                let prefix = message
                    .context
                    .and_then(|c| c.id)
                    .and_then(|quoted| quotes.reply_prefix(&quoted));
                EventPayload::Text {
                    body: match prefix {
                        Some(p) => p + &body,
                        None => body,
                    },
                }
            }
            "audio" | "image" => {
                let (media, item) = if message.kind == "audio" {
                    (MediaKind::Audio, message.audio)
                } else {
                    (MediaKind::Image, message.image)
                };
                let Some(item) = item.filter(|m| !m.id.is_empty()) else {
                    continue;
                };
                EventPayload::Media {
                    media,
                    media_id: item.id,
                    caption: item.caption.filter(|c| !c.is_empty()),
                }
            }
            "location" => {
                let Some(loc) = message.location else {
                    continue;
                };
                let (Some(latitude), Some(longitude)) = (loc.latitude, loc.longitude) else {
                    continue;
                };
                EventPayload::Location {
                    latitude,
                    longitude,
                    name: loc.name.filter(|n| !n.is_empty()),
                    address: loc.address.filter(|a| !a.is_empty()),
                }
            }
            other => {
                debug!(kind = other, "ignoring unsupported whatsapp message type");
                continue;
            }
        };

        events.push(InboundEvent {
            correspondent: Correspondent::whatsapp(message.from),
            message_id,
            payload,
        });
    }
    events
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
    changes: Vec<Change>,
}

#[derive(Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Deserialize, Default)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WaMessage>,
}

#[derive(Deserialize)]
struct WaMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    text: Option<WaText>,
    audio: Option<WaMedia>,
    image: Option<WaMedia>,
    location: Option<WaLocation>,
    context: Option<WaContext>,
}

#[derive(Deserialize)]
struct WaText {
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
struct WaMedia {
    #[serde(default)]
    id: String,
    caption: Option<String>,
}

#[derive(Deserialize)]
struct WaLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    name: Option<String>,
    address: Option<String>,
}

#[derive(Deserialize)]
struct WaContext {
    id: Option<String>,
}

#[derive(Deserialize)]
struct MediaInfo {
    url: Option<String>,
    mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(messages: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": { "messages": messages } }] }]
        })
    }

    #[test]
    fn text_message_is_normalised() {
        let quotes = QuoteCache::default();
        let events = parse_webhook(
            &delivery(json!([{
                "from": "59899123456", "id": "wamid.A", "type": "text",
                "text": { "body": "hola" }
            }])),
            &quotes,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correspondent, Correspondent::whatsapp("59899123456"));
        assert_eq!(events[0].message_id.as_deref(), Some("wamid.A"));
        assert_eq!(
            events[0].payload,
            EventPayload::Text { body: "hola".into() }
        );
        assert_eq!(quotes.get("wamid.A").as_deref(), Some("hola"));
    }

    #[test]
    fn quoted_reply_gets_prefix() {
        let quotes = QuoteCache::default();
        quotes.record("wamid.OUT", "el plan pro sale 990");
        let events = parse_webhook(
            &delivery(json!([{
                "from": "598", "id": "wamid.B", "type": "text",
                "text": { "body": "ese quiero" },
                "context": { "id": "wamid.OUT" }
            }])),
            &quotes,
        );
        assert_eq!(
            events[0].payload,
            EventPayload::Text {
                body: "[respondiendo a: \"el plan pro sale 990\"]\nese quiero".into()
            }
        );
    }

    #[test]
    fn media_and_location_are_normalised() {
        let quotes = QuoteCache::default();
        let events = parse_webhook(
            &delivery(json!([
                { "from": "598", "id": "m1", "type": "image",
                  "image": { "id": "media-1", "caption": "mi local" } },
                { "from": "598", "id": "m2", "type": "audio", "audio": { "id": "media-2" } },
                { "from": "598", "id": "m3", "type": "location",
                  "location": { "latitude": -34.9, "longitude": -56.16, "name": "Oficina" } }
            ])),
            &quotes,
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload.kind(), "image");
        assert_eq!(
            events[1].payload,
            EventPayload::Media {
                media: MediaKind::Audio,
                media_id: "media-2".into(),
                caption: None
            }
        );
        match &events[2].payload {
            EventPayload::Location { name, address, .. } => {
                assert_eq!(name.as_deref(), Some("Oficina"));
                assert!(address.is_none());
            }
            other => panic!("expected location, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_and_incomplete_messages_are_skipped() {
        let quotes = QuoteCache::default();
        let events = parse_webhook(
            &delivery(json!([
                { "from": "598", "id": "s1", "type": "sticker", "sticker": {} },
                { "from": "", "id": "t1", "type": "text", "text": { "body": "x" } },
                { "from": "598", "id": "t2", "type": "text", "text": { "body": "" } },
                { "from": "598", "id": "a1", "type": "audio" }
            ])),
            &quotes,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn status_only_delivery_yields_nothing() {
        let body = json!({ "entry": [{ "changes": [{ "value": { "statuses": [{}] } }] }] });
        assert!(parse_webhook(&body, &QuoteCache::default()).is_empty());
        assert!(parse_webhook(&json!("garbage"), &QuoteCache::default()).is_empty());
    }

    #[test]
    fn typing_body_marks_read() {
        let body = typing_body("wamid.X");
        assert_eq!(body["status"], "read");
        assert_eq!(body["typing_indicator"]["type"], "text");
    }
}

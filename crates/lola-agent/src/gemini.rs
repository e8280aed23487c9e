//! Google Gemini provider (Generative Language API, API-key auth).
//!
//! Several keys can be configured; each becomes its own provider and the
//! [`ProviderRouter`](crate::router::ProviderRouter) fails over between them
//! when one is rate limited.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lola_core::Role;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, DEFAULT_REQUEST_TIMEOUT};

pub struct GeminiProvider {
    client: reqwest::Client,
    name: String,
    api_key: String,
    base_url: String,
    /// Overrides the request model for this key.
    model: Option<String>,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(name: impl Into<String>, api_key: String, base_url: String, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: name.into(),
            api_key,
            base_url,
            model,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Abort the HTTP call after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let model = self.model.as_deref().unwrap_or(&req.model);
        let url = self.endpoint(model);
        let body = build_body(req);

        debug!(provider = %self.name, model, "sending request to Gemini");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_ms: 5000,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp, model))
    }
}

/// Build the generateContent body. Attachments travel as `inline_data` parts
/// next to the text of the same message.
fn build_body(req: &ChatRequest) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                Role::User => "user",
            };
            let mut parts = Vec::with_capacity(2);
            if !m.content.is_empty() {
                parts.push(serde_json::json!({ "text": m.content }));
            }
            if let Some(att) = &m.attachment {
                parts.push(serde_json::json!({
                    "inline_data": {
                        "mime_type": att.mime_type,
                        "data": STANDARD.encode(&att.data),
                    }
                }));
            }
            if parts.is_empty() {
                parts.push(serde_json::json!({ "text": "" }));
            }
            serde_json::json!({ "role": role, "parts": parts })
        })
        .collect();

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "maxOutputTokens": req.max_tokens,
        }
    });

    if !req.system.is_empty() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": req.system }]
        });
    }

    body
}

fn parse_response(resp: GeminiResponse, model: &str) -> ChatResponse {
    let candidate = resp.candidates.into_iter().next();
    let content = candidate
        .as_ref()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let stop_reason = candidate.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        content,
        model: model.to_string(),
        tokens_in: resp
            .usage_metadata
            .as_ref()
            .map(|u| u.prompt_token_count)
            .unwrap_or(0),
        tokens_out: resp
            .usage_metadata
            .as_ref()
            .map(|u| u.candidates_token_count)
            .unwrap_or(0),
        stop_reason,
    }
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use lola_core::Attachment;

    fn request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "gemini-2.5-flash".into(),
            system: "Sos Lola.".into(),
            messages,
            max_tokens: 256,
        }
    }

    #[test]
    fn body_maps_roles_and_system_instruction() {
        let body = build_body(&request(vec![
            Message { role: Role::User, content: "hola".into(), attachment: None },
            Message { role: Role::Assistant, content: "Hola!".into(), attachment: None },
        ]));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Sos Lola.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn attachment_becomes_inline_data_part() {
        let body = build_body(&request(vec![Message {
            role: Role::User,
            content: "(el usuario envió un audio)".into(),
            attachment: Some(Attachment { mime_type: "audio/ogg".into(), data: b"abc".to_vec() }),
        }]));
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "(el usuario envió un audio)");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "audio/ogg");
        assert_eq!(parts[1]["inline_data"]["data"], "YWJj");
    }

    #[test]
    fn response_text_parts_are_joined() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "dale, " }, { "text": "te paso el link" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 5 }
        });
        let resp: GeminiResponse = serde_json::from_value(raw).expect("valid response");
        let parsed = parse_response(resp, "gemini-2.5-flash");
        assert_eq!(parsed.content, "dale, te paso el link");
        assert_eq!(parsed.tokens_in, 12);
        assert_eq!(parsed.stop_reason, "STOP");
    }

    #[test]
    fn blocked_candidate_yields_empty_text() {
        let raw = serde_json::json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        let resp: GeminiResponse = serde_json::from_value(raw).expect("valid response");
        assert!(parse_response(resp, "m").content.is_empty());
    }
}

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{
    ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, DEFAULT_REQUEST_TIMEOUT,
};

/// OpenAI-compatible chat completions backend, used as the last failover slot.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: Option<String>,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            model,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let model = self.model.as_deref().unwrap_or(&req.model);
        let body = build_request_body(req, model);
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        debug!(model, "sending request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // convert seconds to ms
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest, model: &str) -> serde_json::Value {
    // OpenAI uses a flat messages array; system is prepended as a system message.
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];

    for m in &req.messages {
        messages.push(serde_json::json!({
            "role": m.role,
            "content": message_content(m),
        }));
    }

    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    })
}

/// Plain string content, or a parts array when an image is attached.
/// Non-image attachments are not accepted by this API and are dropped.
fn message_content(m: &Message) -> serde_json::Value {
    match &m.attachment {
        Some(att) if att.mime_type.starts_with("image/") => {
            let url = format!("data:{};base64,{}", att.mime_type, STANDARD.encode(&att.data));
            serde_json::json!([
                { "type": "text", "text": m.content },
                { "type": "image_url", "image_url": { "url": url } },
            ])
        }
        Some(att) => {
            debug!(mime = %att.mime_type, "dropping unsupported attachment for OpenAI");
            serde_json::json!(m.content)
        }
        None => serde_json::json!(m.content),
    }
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();
    let stop_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        content,
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        tokens_out: resp
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0),
        stop_reason,
    }
}

// OpenAI API response types (private, deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

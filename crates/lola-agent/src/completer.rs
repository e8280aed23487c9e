use std::sync::Arc;
use std::time::Duration;

use lola_core::Turn;
use tracing::debug;

use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError};

/// Text produced for one conversational turn.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Binds a provider to the system prompt, model and time budget used for
/// every turn.
pub struct Completer {
    provider: Arc<dyn LlmProvider>,
    system: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl Completer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        system: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            system: system.into(),
            model: model.into(),
            max_tokens,
            timeout,
        }
    }

    /// Ask the model for the reply to `new_turn` given the prior `history`.
    ///
    /// Fails with [`ProviderError::Timeout`] when the provider exceeds the
    /// configured budget.
    pub async fn complete(&self, history: &[Turn], new_turn: &Turn) -> Result<Completion, ProviderError> {
        let messages = history
            .iter()
            .chain(std::iter::once(new_turn))
            .map(Message::from)
            .collect();
        let req = ChatRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            messages,
            max_tokens: self.max_tokens,
        };

        let resp = tokio::time::timeout(self.timeout, self.provider.send(&req))
            .await
            .map_err(|_| ProviderError::Timeout {
                ms: self.timeout.as_millis() as u64,
            })??;

        debug!(
            provider = %self.provider.name(),
            model = %resp.model,
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            "completion received"
        );

        Ok(Completion {
            text: resp.content,
            model: resp.model,
            tokens_in: resp.tokens_in,
            tokens_out: resp.tokens_out,
        })
    }
}

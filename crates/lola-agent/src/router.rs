use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, DEFAULT_REQUEST_TIMEOUT};

/// Pause before retrying a slot, multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// One completion backend (usually one API key) in the failover chain.
pub struct ProviderSlot {
    pub provider: Box<dyn LlmProvider>,
    /// Extra attempts after the first failure. Throttled or hung calls are
    /// never retried.
    pub max_retries: u32,
    /// Budget for a single attempt. Must leave room for the later slots
    /// inside the overall completion timeout.
    pub attempt_timeout: Duration,
}

impl ProviderSlot {
    pub fn new(provider: Box<dyn LlmProvider>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries,
            attempt_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    async fn attempt(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        match tokio::time::timeout(self.attempt_timeout, self.provider.send(req)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                ms: self.attempt_timeout.as_millis() as u64,
            }),
        }
    }

    /// Run the slot to success or exhaustion.
    async fn call(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.attempt(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };
            let abandon = matches!(
                err,
                ProviderError::RateLimited { .. } | ProviderError::Timeout { .. }
            );
            if abandon || attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;
            debug!(provider = %self.provider.name(), attempt, error = %err, "retrying completion");
            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
    }
}

/// Priority failover across completion backends.
///
/// Slots are tried in order; the first one to answer wins. The last error
/// is returned when every slot fails, and an empty router is `Unavailable`.
pub struct ProviderRouter {
    slots: Vec<ProviderSlot>,
}

impl ProviderRouter {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_err = None;
        for (index, slot) in self.slots.iter().enumerate() {
            match slot.call(req).await {
                Ok(resp) => {
                    if index > 0 {
                        info!(slot = index, provider = %slot.provider.name(), "completion served by failover slot");
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(slot = index, provider = %slot.provider.name(), error = %e, "completion slot failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ProviderError::Unavailable("no completion provider configured".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completer::Completer;
    use crate::provider::Message;
    use lola_core::{Role, Turn};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct AlwaysFail;

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Unavailable("intentional failure".to_string()))
        }
    }

    struct RateLimited(Arc<AtomicU32>);

    #[async_trait]
    impl LlmProvider for RateLimited {
        fn name(&self) -> &str {
            "rate-limited"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RateLimited { retry_after_ms: 5000 })
        }
    }

    /// Never answers, like a key whose upstream connection stalls.
    struct Hang;

    #[async_trait]
    impl LlmProvider for Hang {
        fn name(&self) -> &str {
            "hang"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Unavailable("unreachable".to_string()))
        }
    }

    struct Flaky(Arc<AtomicU32>);

    #[async_trait]
    impl LlmProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ProviderError::Unavailable("first call fails".to_string()));
            }
            AlwaysOk.send(req).await
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "ok".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
            })
        }
    }

    fn dummy_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            system: "You are a test.".to_string(),
            messages: vec![Message { role: Role::User, content: "hello".to_string(), attachment: None }],
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn router_falls_back_to_second_provider() {
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(AlwaysFail), 0),
            ProviderSlot::new(Box::new(AlwaysOk), 0),
        ]);

        let result = router.send(&dummy_request()).await;
        assert_eq!(result.expect("fallback succeeds").content, "ok");
    }

    #[tokio::test]
    async fn router_errors_when_all_fail() {
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(AlwaysFail), 0),
            ProviderSlot::new(Box::new(AlwaysFail), 0),
        ]);

        let result = router.send(&dummy_request()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_slot_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(RateLimited(calls.clone())), 3),
            ProviderSlot::new(Box::new(AlwaysOk), 0),
        ]);

        assert!(router.send(&dummy_request()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_router_is_unavailable() {
        let router = ProviderRouter::new(Vec::new());
        assert!(matches!(
            router.send(&dummy_request()).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_slot_fails_over_within_completion_budget() {
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(Hang), 2).with_attempt_timeout(Duration::from_secs(10)),
            ProviderSlot::new(Box::new(AlwaysOk), 0),
        ]);
        let completer = Completer::new(
            Arc::new(router),
            "sos Lola",
            "test-model",
            64,
            Duration::from_secs(30),
        );

        let completion = completer
            .complete(&[], &Turn::user("hola"))
            .await
            .expect("second slot answers");
        assert_eq!(completion.text, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn lone_hung_slot_reports_timeout() {
        let router = ProviderRouter::new(vec![
            ProviderSlot::new(Box::new(Hang), 3).with_attempt_timeout(Duration::from_secs(5)),
        ]);
        let started = tokio::time::Instant::now();

        let result = router.send(&dummy_request()).await;
        assert!(matches!(result, Err(ProviderError::Timeout { ms: 5000 })));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_is_retried_on_same_slot() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = ProviderRouter::new(vec![ProviderSlot::new(Box::new(Flaky(calls.clone())), 1)]);

        assert!(router.send(&dummy_request()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

use std::time::Duration;

use lola_channels::Channel;
use tracing::{debug, warn};

/// Outcome of a multi-chunk delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    /// Indices of chunks the channel refused.
    pub failed: Vec<usize>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Paced, best-effort delivery of reply chunks.
pub struct Dispatcher {
    pacing: Duration,
}

impl Dispatcher {
    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    /// Send `chunks` in order. Every chunk after the first is preceded by a
    /// typing signal and a pause. A failed chunk is logged and skipped; the
    /// rest are still attempted and nothing is retried.
    pub async fn deliver(
        &self,
        channel: &dyn Channel,
        recipient: &str,
        in_reply_to: Option<&str>,
        chunks: &[String],
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                if let Err(e) = channel.signal_typing(recipient, in_reply_to).await {
                    warn!(channel = %channel.kind(), recipient, error = %e, "typing signal failed");
                }
                tokio::time::sleep(self.pacing).await;
            }

            match channel.send_text(recipient, chunk).await {
                Ok(message_id) => {
                    report.sent += 1;
                    debug!(
                        channel = %channel.kind(),
                        recipient,
                        chunk = i,
                        message_id = message_id.as_deref().unwrap_or("-"),
                        "chunk sent"
                    );
                }
                Err(e) => {
                    warn!(channel = %channel.kind(), recipient, chunk = i, error = %e, "chunk delivery failed");
                    report.failed.push(i);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lola_channels::ChannelError;
    use lola_core::ChannelKind;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Typing(Option<String>),
        Send(String),
    }

    /// Records calls with their time offset; fails sends containing "FAIL".
    struct Recorder {
        start: Instant,
        calls: Mutex<Vec<(Duration, Call)>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Duration, Call)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for Recorder {
        fn kind(&self) -> ChannelKind {
            ChannelKind::WhatsApp
        }

        async fn send_text(&self, _: &str, text: &str) -> Result<Option<String>, ChannelError> {
            self.calls
                .lock()
                .unwrap()
                .push((self.start.elapsed(), Call::Send(text.to_string())));
            if text.contains("FAIL") {
                return Err(ChannelError::SendFailed("rejected".into()));
            }
            Ok(Some(format!("wamid.{text}")))
        }

        async fn signal_typing(&self, _: &str, in_reply_to: Option<&str>) -> Result<(), ChannelError> {
            self.calls
                .lock()
                .unwrap()
                .push((self.start.elapsed(), Call::Typing(in_reply_to.map(String::from))));
            Ok(())
        }
    }

    fn chunks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn paces_and_signals_between_chunks() {
        let channel = Recorder::new();
        let dispatcher = Dispatcher::new(Duration::from_millis(800));
        let report = dispatcher
            .deliver(&channel, "598", Some("m1"), &chunks(&["uno", "dos", "tres"]))
            .await;

        assert_eq!(report, DeliveryReport { sent: 3, failed: vec![] });
        let calls = channel.calls();
        let kinds: Vec<Call> = calls.iter().map(|(_, c)| c.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                Call::Send("uno".into()),
                Call::Typing(Some("m1".into())),
                Call::Send("dos".into()),
                Call::Typing(Some("m1".into())),
                Call::Send("tres".into()),
            ]
        );
        assert_eq!(calls[0].0, Duration::ZERO);
        assert_eq!(calls[2].0, Duration::from_millis(800));
        assert_eq!(calls[4].0, Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_does_not_abort_delivery() {
        let channel = Recorder::new();
        let dispatcher = Dispatcher::new(Duration::from_millis(800));
        let report = dispatcher
            .deliver(&channel, "598", None, &chunks(&["uno", "FAIL", "tres"]))
            .await;

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, vec![1]);
        assert!(!report.is_complete());
        assert!(channel
            .calls()
            .iter()
            .any(|(_, c)| *c == Call::Send("tres".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_has_no_pause() {
        let channel = Recorder::new();
        let dispatcher = Dispatcher::new(Duration::from_millis(800));
        dispatcher.deliver(&channel, "598", None, &chunks(&["solo"])).await;
        assert_eq!(channel.calls().len(), 1);
    }
}

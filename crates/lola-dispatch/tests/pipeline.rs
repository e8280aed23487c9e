// End-to-end turns through the pipeline with in-memory channel, model and
// payment backends. Timer-driven tests run on a paused clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lola_agent::{ChatRequest, ChatResponse, Completer, LlmProvider, ProviderError};
use lola_channels::{Channel, ChannelError, ChannelManager};
use lola_core::config::PipelineConfig;
use lola_core::{
    Attachment, ChannelKind, Correspondent, EventPayload, InboundEvent, LolaError, MediaKind, Role,
};
use lola_dispatch::{FlushedBatch, IngestOutcome, Pipeline, TurnStage};
use lola_payments::{PaymentError, PaymentProvider, PaymentRecord, SubscriptionRecord};
use lola_sessions::{SessionKey, DEMO_CONTEXT};

// ---- fakes ----------------------------------------------------------------

#[derive(Default)]
struct FakeChannel {
    sent: Mutex<Vec<(String, String)>>,
    typing: Mutex<Vec<Option<String>>>,
    media: Option<Attachment>,
}

impl FakeChannel {
    fn with_media(media: Attachment) -> Self {
        Self {
            media: Some(media),
            ..Default::default()
        }
    }

    fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    fn typing(&self) -> Vec<Option<String>> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<Option<String>, ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(Some("wamid.out".to_string()))
    }

    async fn signal_typing(&self, _: &str, in_reply_to: Option<&str>) -> Result<(), ChannelError> {
        self.typing.lock().unwrap().push(in_reply_to.map(String::from));
        Ok(())
    }

    async fn fetch_media(&self, media_id: &str) -> Result<Attachment, ChannelError> {
        self.media
            .clone()
            .ok_or_else(|| ChannelError::MediaUnavailable(media_id.to_string()))
    }
}

/// Replies from a script (then "ok"), optionally after a delay, and keeps
/// every request it saw.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Duration,
}

impl ScriptedModel {
    fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        let mut replies = VecDeque::new();
        replies.push_back(Err(ProviderError::Unavailable("down".into())));
        Self {
            replies: Mutex::new(replies),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn last_user_text(&self, request: usize) -> String {
        let requests = self.requests();
        let msg = requests[request].messages.last().expect("has messages");
        assert_eq!(msg.role, Role::User);
        msg.content.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        let content = next.unwrap_or_else(|| Ok("ok".to_string()))?;
        Ok(ChatResponse {
            content,
            model: "scripted-1".into(),
            tokens_in: 10,
            tokens_out: 5,
            stop_reason: "stop".into(),
        })
    }
}

#[derive(Default)]
struct FakePayments {
    charges: Mutex<Vec<(f64, String, String)>>,
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_preference(
        &self,
        amount: f64,
        description: &str,
        payer_ref: &str,
    ) -> Result<String, PaymentError> {
        self.charges
            .lock()
            .unwrap()
            .push((amount, description.to_string(), payer_ref.to_string()));
        Ok("https://pay/xyz".to_string())
    }

    async fn find_latest_payment(&self, _: &str) -> Result<Option<PaymentRecord>, PaymentError> {
        Ok(None)
    }

    async fn find_subscription(&self, _: &str) -> Result<Option<SubscriptionRecord>, PaymentError> {
        Ok(None)
    }

    fn plan_link(&self, _: &str) -> Option<String> {
        None
    }
}

// ---- helpers --------------------------------------------------------------

fn build(
    model: Arc<ScriptedModel>,
    channel: Arc<FakeChannel>,
    payments: Option<Arc<dyn PaymentProvider>>,
) -> Arc<Pipeline> {
    let mut channels = ChannelManager::new();
    channels.register(channel);
    let completer = Arc::new(Completer::new(
        model,
        "sos Lola",
        "scripted-1",
        256,
        Duration::from_secs(30),
    ));
    Pipeline::new(&PipelineConfig::default(), Arc::new(channels), completer, payments)
}

fn ana() -> Correspondent {
    Correspondent::whatsapp("59899123456")
}

fn text(id: &str, body: &str) -> InboundEvent {
    InboundEvent::text(ana(), Some(id), body)
}

fn audio_batch() -> FlushedBatch {
    FlushedBatch {
        correspondent: ana(),
        batch_id: 1,
        first_message_id: Some("m1".into()),
        events: vec![InboundEvent {
            correspondent: ana(),
            message_id: Some("m1".into()),
            payload: EventPayload::Media {
                media: MediaKind::Audio,
                media_id: "media-1".into(),
                caption: None,
            },
        }],
    }
}

// ---- scenarios ------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn burst_becomes_one_turn() {
    let model = Arc::new(ScriptedModel::replying(&["bien y vos?"]));
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model.clone(), channel.clone(), None);

    assert_eq!(pipeline.ingest(text("m1", "hola")), IngestOutcome::Started);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        pipeline.ingest(text("m2", "como estas")),
        IngestOutcome::Appended { buffered: 2 }
    );
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(model.requests().len(), 1);
    assert_eq!(model.last_user_text(0), "hola\ncomo estas");
    assert_eq!(channel.texts(), vec!["Bien y vos?"]);
    assert_eq!(channel.typing(), vec![Some("m1".to_string())]);
    assert_eq!(pipeline.stats().pending_batches, 0);
}

#[tokio::test(start_paused = true)]
async fn charge_directive_is_replaced_by_link() {
    let model = Arc::new(ScriptedModel::replying(&[
        "dale, te paso el link {{cobrar:2500:Remera}}",
    ]));
    let channel = Arc::new(FakeChannel::default());
    let payments = Arc::new(FakePayments::default());
    let pipeline = build(model, channel.clone(), Some(payments.clone()));

    pipeline.ingest(text("m1", "quiero la remera"));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(channel.texts(), vec!["Dale, te paso el link 👉 https://pay/xyz"]);
    assert_eq!(
        payments.charges.lock().unwrap().as_slice(),
        &[(2500.0, "Remera".to_string(), "59899123456".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn redelivered_message_is_dropped() {
    let model = Arc::new(ScriptedModel::default());
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model.clone(), channel, None);

    assert_eq!(pipeline.ingest(text("wamid.1", "hola")), IngestOutcome::Started);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pipeline.ingest(text("wamid.1", "hola")), IngestOutcome::Duplicate);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(model.requests().len(), 1);
    assert_eq!(model.last_user_text(0), "hola");
}

#[tokio::test(start_paused = true)]
async fn event_during_processing_starts_a_new_batch() {
    let model = Arc::new(ScriptedModel {
        delay: Duration::from_secs(3),
        ..ScriptedModel::replying(&["primera", "segunda"])
    });
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model.clone(), channel.clone(), None);

    pipeline.ingest(text("m1", "uno"));
    // Flush fires at 5s; the model is busy until 8s.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(model.requests().len(), 1);
    assert_eq!(pipeline.ingest(text("m2", "dos")), IngestOutcome::Started);
    tokio::time::sleep(Duration::from_secs(20)).await;

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(model.last_user_text(0), "uno");
    assert_eq!(model.last_user_text(1), "dos");
    // uno, primera, dos
    assert_eq!(requests[1].messages.len(), 3);
    assert_eq!(channel.texts(), vec!["Primera", "Segunda"]);
}

#[tokio::test(start_paused = true)]
async fn multi_line_reply_is_paced() {
    let model = Arc::new(ScriptedModel::replying(&["hola!\ntenemos remeras y buzos"]));
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model, channel.clone(), None);

    pipeline.ingest(text("m1", "que venden?"));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(channel.texts(), vec!["Hola!", "tenemos remeras y buzos"]);
    // Once on batch open, once between the two chunks.
    assert_eq!(
        channel.typing(),
        vec![Some("m1".to_string()), Some("m1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn completion_failure_sends_apology() {
    let model = Arc::new(ScriptedModel::failing());
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model, channel.clone(), None);

    let batch = FlushedBatch {
        correspondent: ana(),
        batch_id: 7,
        first_message_id: Some("m1".into()),
        events: vec![text("m1", "hola")],
    };
    let outcome = pipeline.process_batch(batch).await;

    assert_eq!(outcome.stage, TurnStage::Failed);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(
        channel.texts(),
        vec!["Uh, tuve un error procesando tu mensaje. Probá de nuevo en un rato."]
    );
}

#[tokio::test(start_paused = true)]
async fn undownloadable_media_asks_to_resend() {
    let model = Arc::new(ScriptedModel::default());
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model.clone(), channel.clone(), None);

    let outcome = pipeline.process_batch(audio_batch()).await;

    assert_eq!(outcome.stage, TurnStage::Failed);
    assert_eq!(
        channel.texts(),
        vec!["No pude recibir el audio, me lo mandás de nuevo?"]
    );
    assert!(model.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn media_is_forwarded_inline_and_stored_as_placeholder() {
    let model = Arc::new(ScriptedModel::replying(&["dale, anotado"]));
    let channel = Arc::new(FakeChannel::with_media(Attachment {
        mime_type: "audio/ogg".into(),
        data: vec![1, 2, 3],
    }));
    let pipeline = build(model.clone(), channel.clone(), None);

    let outcome = pipeline.process_batch(audio_batch()).await;
    assert_eq!(outcome.stage, TurnStage::Done);
    assert_eq!(outcome.reply.as_deref(), Some("Dale, anotado"));

    let requests = model.requests();
    let sent = requests[0].messages.last().expect("user turn");
    assert_eq!(sent.content, "(el usuario envió un audio)");
    assert_eq!(sent.attachment.as_ref().map(|a| a.data.len()), Some(3));

    let history = pipeline.history(&SessionKey::sales(ana()));
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "[audio]");
    assert!(history[0].attachment.is_none());
    assert_eq!(history[1].text, "Dale, anotado");
}

#[tokio::test(start_paused = true)]
async fn history_carries_into_next_turn() {
    let model = Arc::new(ScriptedModel::replying(&["hola!", "sale 2500"]));
    let channel = Arc::new(FakeChannel::default());
    let pipeline = build(model.clone(), channel, None);

    pipeline.ingest(text("m1", "hola"));
    tokio::time::sleep(Duration::from_secs(10)).await;
    pipeline.ingest(text("m2", "cuanto sale?"));
    tokio::time::sleep(Duration::from_secs(10)).await;

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let contents: Vec<&str> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hola", "Hola!", "cuanto sale?"]);
}

#[tokio::test(start_paused = true)]
async fn disabled_channel_is_dropped() {
    let model = Arc::new(ScriptedModel::default());
    let pipeline = build(model.clone(), Arc::new(FakeChannel::default()), None);

    let event = InboundEvent::text(Correspondent::instagram("17841"), Some("ig-1"), "hola");
    assert_eq!(pipeline.ingest(event), IngestOutcome::ChannelDisabled);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn web_demo_reply_is_synchronous_and_resettable() {
    let model = Arc::new(ScriptedModel::replying(&["hola, soy Lola. Te muestro como vendo."]));
    let pipeline = build(model.clone(), Arc::new(FakeChannel::default()), None);
    let visitor = Correspondent::web("session-1");

    let reply = pipeline
        .reply_once(&visitor, DEMO_CONTEXT, "  hola  ")
        .await
        .unwrap();
    assert_eq!(reply.reply, "Hola, soy Lola. Te muestro como vendo.");
    assert_eq!(reply.chunks, vec![reply.reply.clone()]);
    assert_eq!(model.last_user_text(0), "hola");

    let demo = SessionKey::new(visitor.clone(), DEMO_CONTEXT);
    assert_eq!(pipeline.history(&demo).len(), 2);
    assert!(pipeline.history(&SessionKey::sales(visitor.clone())).is_empty());

    assert!(pipeline.reset_history(&demo));
    assert!(pipeline.history(&demo).is_empty());
}

#[tokio::test]
async fn web_demo_rejects_blank_message() {
    let model = Arc::new(ScriptedModel::default());
    let pipeline = build(model.clone(), Arc::new(FakeChannel::default()), None);

    let err = pipeline
        .reply_once(&Correspondent::web("s"), DEMO_CONTEXT, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, LolaError::Validation(_)));
    assert!(model.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sweep_forgets_idle_state() {
    let model = Arc::new(ScriptedModel::default());
    let pipeline = build(model, Arc::new(FakeChannel::default()), None);

    pipeline.ingest(text("m1", "hola"));
    tokio::time::sleep(Duration::from_secs(10)).await;
    let stats = pipeline.stats();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.seen_ids, 1);

    tokio::time::sleep(Duration::from_secs(31 * 60)).await;
    assert_eq!(pipeline.sweep(), (1, 1));
    assert_eq!(pipeline.stats().sessions, 0);
}

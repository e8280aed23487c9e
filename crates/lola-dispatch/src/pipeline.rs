//! The turn pipeline: inbound event to delivered reply.
//!
//! ```text
//! ingest ─▶ DedupCache ─▶ Debouncer ─(flush)─▶ process_batch
//!   merge ─▶ media ─▶ HistoryStore ─▶ Completer ─▶ MacroEngine
//!   ─▶ present/segment ─▶ Dispatcher
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lola_agent::{Completer, ProviderError};
use lola_channels::{Channel, ChannelManager};
use lola_core::config::PipelineConfig;
use lola_core::{Correspondent, InboundEvent, LolaError, MediaKind, Turn};
use lola_payments::PaymentProvider;
use lola_sessions::{HistoryStore, SessionKey};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::debounce::{BatchHandler, Debouncer, Enqueued, FlushedBatch};
use crate::dedup::DedupCache;
use crate::dispatcher::Dispatcher;
use crate::macros::{directives, MacroEngine};
use crate::segment::present;

const APOLOGY: &str = "Uh, tuve un error procesando tu mensaje. Probá de nuevo en un rato.";

/// Where a turn is in its life. Logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Received,
    Deduped,
    Buffered,
    Flushed,
    Completing,
    Substituting,
    Segmented,
    Dispatching,
    Done,
    Failed,
}

impl TurnStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStage::Received => "received",
            TurnStage::Deduped => "deduped",
            TurnStage::Buffered => "buffered",
            TurnStage::Flushed => "flushed",
            TurnStage::Completing => "completing",
            TurnStage::Substituting => "substituting",
            TurnStage::Segmented => "segmented",
            TurnStage::Dispatching => "dispatching",
            TurnStage::Done => "done",
            TurnStage::Failed => "failed",
        }
    }
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an inbound event at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Seen within the dedup window; dropped.
    Duplicate,
    /// No adapter is configured for the event's channel; dropped.
    ChannelDisabled,
    /// Opened a new batch.
    Started,
    /// Joined a waiting batch.
    Appended { buffered: usize },
}

/// Final state of one processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub stage: TurnStage,
    /// Chunks the channel accepted.
    pub delivered: usize,
    /// Text shown to the correspondent (reply, apology or media notice).
    pub reply: Option<String>,
}

/// Synchronous reply for the web demo chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebReply {
    pub reply: String,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub pending_batches: usize,
    pub sessions: usize,
    pub seen_ids: usize,
}

/// Owns every keyed store and drives each turn through them.
pub struct Pipeline {
    dedup: DedupCache,
    debouncer: Arc<Debouncer>,
    history: HistoryStore,
    completer: Arc<Completer>,
    macros: MacroEngine,
    dispatcher: Dispatcher,
    channels: Arc<ChannelManager>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        channels: Arc<ChannelManager>,
        completer: Arc<Completer>,
        payments: Option<Arc<dyn PaymentProvider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dedup: DedupCache::new(Duration::from_secs(config.dedup_ttl_secs)),
            debouncer: Arc::new(Debouncer::new(Duration::from_millis(config.debounce_ms))),
            history: HistoryStore::new(
                config.history_max_turns,
                Duration::from_secs(config.history_ttl_secs),
            ),
            completer,
            macros: MacroEngine::new(payments),
            dispatcher: Dispatcher::new(Duration::from_millis(config.pacing_ms)),
            channels,
        })
    }

    /// Accept a normalised inbound event. Returns immediately; the reply is
    /// produced by the scheduled flush.
    pub fn ingest(self: &Arc<Self>, event: InboundEvent) -> IngestOutcome {
        let correspondent = event.correspondent.clone();
        stage(&correspondent, TurnStage::Received);

        let Some(channel) = self.channels.get(correspondent.channel) else {
            warn!(correspondent = %correspondent, "inbound event for a disabled channel dropped");
            return IngestOutcome::ChannelDisabled;
        };

        if self
            .dedup
            .seen(correspondent.channel, event.message_id.as_deref())
        {
            return IngestOutcome::Duplicate;
        }
        stage(&correspondent, TurnStage::Deduped);

        let handler: Arc<dyn BatchHandler> = self.clone();
        let outcome = match self.debouncer.enqueue(event, handler) {
            Enqueued::Started { first_message_id } => {
                let who = correspondent.clone();
                tokio::spawn(async move {
                    if let Err(e) = channel
                        .signal_typing(&who.address, first_message_id.as_deref())
                        .await
                    {
                        debug!(correspondent = %who, error = %e, "typing signal failed");
                    }
                });
                IngestOutcome::Started
            }
            Enqueued::Appended { buffered } => IngestOutcome::Appended { buffered },
        };
        stage(&correspondent, TurnStage::Buffered);
        outcome
    }

    /// Run one detached batch to completion.
    pub async fn process_batch(&self, batch: FlushedBatch) -> TurnOutcome {
        let correspondent = batch.correspondent.clone();
        let merged = batch.merge();
        info!(
            correspondent = %correspondent,
            batch_id = batch.batch_id,
            events = merged.event_count,
            stage = %TurnStage::Flushed,
            "turn flushed"
        );

        let Some(channel) = self.channels.get(correspondent.channel) else {
            warn!(correspondent = %correspondent, "channel disappeared before flush");
            return failed(&correspondent, 0, None);
        };
        let recipient = correspondent.address.as_str();
        let in_reply_to = merged.first_message_id.as_deref();

        let mut user_turn = Turn::user(merged.text.clone());
        let mut history_text = merged.text.clone();
        if let Some((kind, media_id)) = &merged.media {
            match channel.fetch_media(media_id).await {
                Ok(attachment) => {
                    debug!(
                        correspondent = %correspondent,
                        media = kind.label(),
                        bytes = attachment.data.len(),
                        "media downloaded"
                    );
                    if merged.text.trim().is_empty() {
                        user_turn.text = media_note(*kind).to_string();
                        history_text = format!("[{}]", kind.label());
                    }
                    user_turn = user_turn.with_attachment(attachment);
                }
                Err(e) => {
                    warn!(correspondent = %correspondent, media_id = %media_id, error = %e, "media download failed");
                    let notice = format!("No pude recibir {}, me lo mandás de nuevo?", kind.with_article());
                    let report = self
                        .dispatcher
                        .deliver(channel.as_ref(), recipient, in_reply_to, &[notice.clone()])
                        .await;
                    return failed(&correspondent, report.sent, Some(notice));
                }
            }
        }

        if user_turn.text.trim().is_empty() {
            debug!(correspondent = %correspondent, "empty turn dropped");
            return failed(&correspondent, 0, None);
        }

        let key = SessionKey::sales(correspondent.clone());
        let history = self.history.get(&key);
        self.history.append(&key, Turn::user(history_text));

        stage(&correspondent, TurnStage::Completing);
        let completion = match self.completer.complete(&history, &user_turn).await {
            Ok(c) if !c.text.trim().is_empty() => c,
            Ok(_) => {
                warn!(correspondent = %correspondent, "completion returned empty text");
                return self.apologise(channel.as_ref(), &correspondent, in_reply_to).await;
            }
            Err(e) => {
                warn!(correspondent = %correspondent, error = %e, "completion failed");
                return self.apologise(channel.as_ref(), &correspondent, in_reply_to).await;
            }
        };
        info!(
            correspondent = %correspondent,
            model = %completion.model,
            tokens_in = completion.tokens_in,
            tokens_out = completion.tokens_out,
            "reply generated"
        );

        stage(&correspondent, TurnStage::Substituting);
        let found = directives(&completion.text);
        if !found.is_empty() {
            info!(correspondent = %correspondent, directives = ?found, "reply carries payment directives");
        }
        let reply = self.macros.expand(&completion.text, recipient).await;

        let presented = present(&reply);
        debug!(
            correspondent = %correspondent,
            chunks = presented.chunks.len(),
            stage = %TurnStage::Segmented,
            "reply segmented"
        );
        self.history
            .append(&key, Turn::assistant(presented.text.clone()));

        stage(&correspondent, TurnStage::Dispatching);
        let report = self
            .dispatcher
            .deliver(channel.as_ref(), recipient, in_reply_to, &presented.chunks)
            .await;

        if report.is_complete() {
            info!(
                correspondent = %correspondent,
                sent = report.sent,
                stage = %TurnStage::Done,
                "turn done"
            );
        } else {
            warn!(
                correspondent = %correspondent,
                sent = report.sent,
                failed = ?report.failed,
                stage = %TurnStage::Done,
                "turn done with undelivered chunks"
            );
        }
        TurnOutcome {
            stage: TurnStage::Done,
            delivered: report.sent,
            reply: Some(presented.text),
        }
    }

    async fn apologise(
        &self,
        channel: &dyn Channel,
        correspondent: &Correspondent,
        in_reply_to: Option<&str>,
    ) -> TurnOutcome {
        let report = self
            .dispatcher
            .deliver(channel, &correspondent.address, in_reply_to, &[APOLOGY.to_string()])
            .await;
        failed(correspondent, report.sent, Some(APOLOGY.to_string()))
    }

    /// One synchronous turn without aggregation or paced delivery, used by
    /// the web demo chat. History is kept under `context`.
    pub async fn reply_once(
        &self,
        correspondent: &Correspondent,
        context: &str,
        text: &str,
    ) -> Result<WebReply, LolaError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LolaError::Validation("message is empty".to_string()));
        }

        let key = SessionKey::new(correspondent.clone(), context);
        let history = self.history.get(&key);
        let user_turn = Turn::user(text);
        self.history.append(&key, user_turn.clone());

        let completion = self
            .completer
            .complete(&history, &user_turn)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "completion failed");
                match e {
                    ProviderError::Timeout { ms } => LolaError::Timeout { ms },
                    other => LolaError::Completion(other.to_string()),
                }
            })?;
        if completion.text.trim().is_empty() {
            return Err(LolaError::Completion("empty reply".to_string()));
        }

        let reply = self.macros.expand(&completion.text, &correspondent.address).await;
        let presented = present(&reply);
        self.history
            .append(&key, Turn::assistant(presented.text.clone()));

        Ok(WebReply {
            reply: presented.text,
            chunks: presented.chunks,
        })
    }

    /// Forget the conversation under `key`.
    pub fn reset_history(&self, key: &SessionKey) -> bool {
        self.history.reset(key)
    }

    /// Copy of the turns stored under `key`.
    pub fn history(&self, key: &SessionKey) -> Vec<Turn> {
        self.history.get(key)
    }

    /// Periodic maintenance: drop idle histories and expired message ids.
    pub fn sweep(&self) -> (usize, usize) {
        let sessions = self.history.purge_expired();
        let ids = self.dedup.purge();
        if sessions > 0 || ids > 0 {
            info!(sessions, ids, "sweep purged expired state");
        }
        (sessions, ids)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            pending_batches: self.debouncer.pending(),
            sessions: self.history.len(),
            seen_ids: self.dedup.len(),
        }
    }
}

#[async_trait]
impl BatchHandler for Pipeline {
    async fn handle(&self, batch: FlushedBatch) {
        self.process_batch(batch).await;
    }
}

fn stage(correspondent: &Correspondent, stage: TurnStage) {
    debug!(correspondent = %correspondent, stage = %stage, "turn stage");
}

fn failed(correspondent: &Correspondent, delivered: usize, reply: Option<String>) -> TurnOutcome {
    warn!(correspondent = %correspondent, delivered, stage = %TurnStage::Failed, "turn failed");
    TurnOutcome {
        stage: TurnStage::Failed,
        delivered,
        reply,
    }
}

/// Text the model sees for a media item sent without any words.
fn media_note(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "(el usuario envió un audio)",
        MediaKind::Image => "(el usuario envió una imagen)",
    }
}

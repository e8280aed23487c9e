use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lola_core::{Correspondent, EventPayload, InboundEvent, MediaKind};
use tracing::{debug, info};

/// Receives each batch once it has been detached from the aggregator.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: FlushedBatch);
}

/// Result of [`Debouncer::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// A new batch was opened and its flush scheduled. The caller should
    /// show "typing" anchored to `first_message_id`.
    Started { first_message_id: Option<String> },
    /// The event joined a batch that is already waiting.
    Appended { buffered: usize },
}

struct PendingBatch {
    id: u64,
    events: Vec<InboundEvent>,
    first_message_id: Option<String>,
}

/// A batch removed from the aggregator, owned by whoever processes it.
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    pub correspondent: Correspondent,
    pub batch_id: u64,
    pub events: Vec<InboundEvent>,
    pub first_message_id: Option<String>,
}

/// The single turn input produced by merging a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedInput {
    /// Text and location lines in arrival order, newline-joined, followed by
    /// the caption of the retained media.
    pub text: String,
    /// Latest media item in the burst; earlier ones are discarded.
    pub media: Option<(MediaKind, String)>,
    pub first_message_id: Option<String>,
    pub event_count: usize,
}

impl FlushedBatch {
    pub fn merge(&self) -> MergedInput {
        let mut lines: Vec<String> = Vec::with_capacity(self.events.len());
        let mut media: Option<(MediaKind, String, Option<String>)> = None;

        for event in &self.events {
            match &event.payload {
                EventPayload::Text { body } => {
                    if !body.trim().is_empty() {
                        lines.push(body.clone());
                    }
                }
                EventPayload::Location {
                    latitude,
                    longitude,
                    name,
                    address,
                } => lines.push(render_location(
                    *latitude,
                    *longitude,
                    name.as_deref(),
                    address.as_deref(),
                )),
                EventPayload::Media {
                    media: kind,
                    media_id,
                    caption,
                } => media = Some((*kind, media_id.clone(), caption.clone())),
            }
        }

        let media = media.map(|(kind, id, caption)| {
            if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
                lines.push(caption);
            }
            (kind, id)
        });

        MergedInput {
            text: lines.join("\n"),
            media,
            first_message_id: self.first_message_id.clone(),
            event_count: self.events.len(),
        }
    }
}

/// Synthetic text line standing in for a shared location.
pub fn render_location(latitude: f64, longitude: f64, name: Option<&str>, address: Option<&str>) -> String {
    let mut parts = vec![format!("Ubicación: {latitude}, {longitude}")];
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        parts.push(format!("Nombre: {name}"));
    }
    if let Some(address) = address.filter(|a| !a.is_empty()) {
        parts.push(format!("Dirección: {address}"));
    }
    format!("(el usuario compartió su ubicación: {})", parts.join(" | "))
}

/// Per-correspondent burst coalescing.
///
/// The first event for an idle correspondent opens a batch and schedules
/// one flush `delay` later; the delay is anchored to that first event, so
/// later events never push it back. The flush task re-resolves the batch by
/// id when it fires, detaches it atomically and hands it to the handler;
/// anything enqueued after that point opens a fresh batch.
pub struct Debouncer {
    pending: DashMap<Correspondent, PendingBatch>,
    next_id: AtomicU64,
    delay: Duration,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            delay,
        }
    }

    pub fn enqueue(self: &Arc<Self>, event: InboundEvent, handler: Arc<dyn BatchHandler>) -> Enqueued {
        let correspondent = event.correspondent.clone();

        let (batch_id, first_message_id) = match self.pending.entry(correspondent.clone()) {
            Entry::Occupied(mut e) => {
                let batch = e.get_mut();
                batch.events.push(event);
                let buffered = batch.events.len();
                debug!(correspondent = %correspondent, buffered, "event buffered");
                return Enqueued::Appended { buffered };
            }
            Entry::Vacant(e) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let first_message_id = event.message_id.clone();
                e.insert(PendingBatch {
                    id,
                    events: vec![event],
                    first_message_id: first_message_id.clone(),
                });
                (id, first_message_id)
            }
        };

        info!(
            correspondent = %correspondent,
            batch_id,
            delay_ms = self.delay.as_millis() as u64,
            "batch opened"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            if let Some(batch) = this.flush(&correspondent, batch_id) {
                handler.handle(batch).await;
            }
        });

        Enqueued::Started { first_message_id }
    }

    /// Detach the batch for `correspondent` if it is still batch `batch_id`.
    ///
    /// A stale trigger (the batch was already flushed or replaced) gets `None`.
    pub fn flush(&self, correspondent: &Correspondent, batch_id: u64) -> Option<FlushedBatch> {
        let (correspondent, batch) = self
            .pending
            .remove_if(correspondent, |_, b| b.id == batch_id)?;
        debug!(
            correspondent = %correspondent,
            batch_id,
            events = batch.events.len(),
            "batch detached"
        );
        Some(FlushedBatch {
            correspondent,
            batch_id: batch.id,
            events: batch.events,
            first_message_id: batch.first_message_id,
        })
    }

    /// Number of correspondents with a batch waiting to flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

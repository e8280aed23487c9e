use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lola_core::ChannelKind;
use tokio::time::Instant;
use tracing::debug;

/// Recently seen inbound message ids, per channel, with a fixed TTL.
///
/// Providers redeliver webhooks they consider slow; this is the safety net
/// that keeps a redelivery from becoming a second turn.
pub struct DedupCache {
    seen: DashMap<(ChannelKind, String), Instant>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Test-and-mark. `true` means the id was already seen within the TTL
    /// and the event must be dropped.
    ///
    /// Events without an id always pass.
    pub fn seen(&self, channel: ChannelKind, message_id: Option<&str>) -> bool {
        let Some(id) = message_id.filter(|id| !id.is_empty()) else {
            return false;
        };
        let now = Instant::now();

        let duplicate = match self.seen.entry((channel, id.to_string())) {
            Entry::Occupied(mut e) => {
                if now.duration_since(*e.get()) <= self.ttl {
                    true
                } else {
                    e.insert(now);
                    false
                }
            }
            Entry::Vacant(e) => {
                e.insert(now);
                false
            }
        };

        if duplicate {
            debug!(channel = %channel, message_id = id, "duplicate inbound message dropped");
        } else {
            self.purge_at(now);
        }
        duplicate
    }

    /// Drop every id older than the TTL. Returns how many were removed.
    pub fn purge(&self) -> usize {
        self.purge_at(Instant::now())
    }

    fn purge_at(&self, now: Instant) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) <= self.ttl);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

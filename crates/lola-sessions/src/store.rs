use std::time::Duration;

use dashmap::DashMap;
use lola_core::Turn;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::types::SessionKey;

struct Session {
    turns: Vec<Turn>,
    last_active: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.last_active) > ttl
    }
}

/// In-memory, bounded, idle-expiring conversation histories.
///
/// Each key owns an independent turn list. A list idle for longer than the
/// TTL is treated as absent; it is dropped lazily on the next access or by
/// [`HistoryStore::purge_expired`]. Nothing survives a restart.
pub struct HistoryStore {
    sessions: DashMap<SessionKey, Session>,
    max_turns: usize,
    ttl: Duration,
}

impl HistoryStore {
    pub fn new(max_turns: usize, ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns: max_turns.max(1),
            ttl,
        }
    }

    /// Return a copy of the turns for `key`, oldest first.
    ///
    /// An expired list is evicted and reported as empty.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get(&self, key: &SessionKey) -> Vec<Turn> {
        let now = Instant::now();
        if self
            .sessions
            .remove_if(key, |_, s| s.is_expired(now, self.ttl))
            .is_some()
        {
            debug!("history expired");
            return Vec::new();
        }
        self.sessions
            .get(key)
            .map(|s| s.turns.clone())
            .unwrap_or_default()
    }

    /// Append a turn, trimming from the oldest end to stay within the cap.
    #[instrument(skip(self, turn), fields(key = %key, role = ?turn.role))]
    pub fn append(&self, key: &SessionKey, turn: Turn) {
        let now = Instant::now();
        self.sessions
            .remove_if(key, |_, s| s.is_expired(now, self.ttl));

        let mut session = self.sessions.entry(key.clone()).or_insert_with(|| Session {
            turns: Vec::new(),
            last_active: now,
        });
        session.turns.push(turn);
        let excess = session.turns.len().saturating_sub(self.max_turns);
        if excess > 0 {
            session.turns.drain(..excess);
        }
        session.last_active = now;
    }

    /// Drop the history for `key`. Returns whether anything was removed.
    pub fn reset(&self, key: &SessionKey) -> bool {
        self.sessions.remove(key).is_some()
    }

    /// Remove every expired list. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now, self.ttl));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, "purged expired histories");
        }
        purged
    }

    /// Number of live (not necessarily unexpired) histories.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

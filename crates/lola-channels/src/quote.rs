use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Default number of remembered messages.
pub const QUOTE_CACHE_CAPACITY: usize = 200;
/// Stored text is cut to this many characters.
const STORED_CHARS: usize = 500;
/// Quoted text shown to the model is cut to this many characters.
const QUOTED_CHARS: usize = 200;

struct Inner {
    texts: HashMap<String, String>,
    order: VecDeque<String>,
}

/// Bounded map of platform message id to message text.
///
/// Used to resolve WhatsApp quote-replies: both inbound texts and the texts
/// we send are recorded. When the cache overflows the oldest half is dropped.
pub struct QuoteCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl QuoteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                texts: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(2),
        }
    }

    pub fn record(&self, message_id: &str, text: &str) {
        if message_id.is_empty() {
            return;
        }
        let stored: String = text.chars().take(STORED_CHARS).collect();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.texts.insert(message_id.to_string(), stored).is_none() {
            inner.order.push_back(message_id.to_string());
        }
        if inner.texts.len() > self.capacity {
            let drop_count = inner.order.len() / 2;
            for _ in 0..drop_count {
                if let Some(old) = inner.order.pop_front() {
                    inner.texts.remove(&old);
                }
            }
        }
    }

    pub fn get(&self, message_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.texts.get(message_id).cloned()
    }

    /// `[respondiendo a: "<quoted>"]\n` for a known id, `None` otherwise.
    pub fn reply_prefix(&self, quoted_id: &str) -> Option<String> {
        let quoted = self.get(quoted_id)?;
        let cut: String = quoted.chars().take(QUOTED_CHARS).collect();
        Some(format!("[respondiendo a: \"{cut}\"]\n"))
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .texts
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new(QUOTE_CACHE_CAPACITY)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use lola_core::ChannelKind;
use tracing::info;

use crate::channel::Channel;

/// Registry of the configured channel adapters, keyed by [`ChannelKind`].
///
/// Adapters are shared behind `Arc` so a flush task can hold one across
/// its awaits without borrowing the manager.
pub struct ChannelManager {
    channels: HashMap<ChannelKind, Arc<dyn Channel>>,
}

impl ChannelManager {
    /// Create an empty manager with no registered channels.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter.
    ///
    /// If an adapter for the same kind is already registered it is replaced.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let kind = channel.kind();
        info!(channel = %kind, "registering channel adapter");
        self.channels.insert(kind, channel);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Channel>> {
        self.channels.get(&kind).cloned()
    }

    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    /// Names of every registered channel, sorted for deterministic output.
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.channels.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::ChannelError;

    struct Null(ChannelKind);

    #[async_trait]
    impl Channel for Null {
        fn kind(&self) -> ChannelKind {
            self.0
        }
        async fn send_text(&self, _: &str, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
        async fn signal_typing(&self, _: &str, _: Option<&str>) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn enabled_is_sorted() {
        let mut mgr = ChannelManager::new();
        mgr.register(Arc::new(Null(ChannelKind::WhatsApp)));
        mgr.register(Arc::new(Null(ChannelKind::Instagram)));
        assert_eq!(mgr.enabled(), vec!["instagram", "whatsapp"]);
        assert!(mgr.get(ChannelKind::Web).is_none());
    }

    #[tokio::test]
    async fn default_fetch_media_is_unsupported() {
        let ch = Null(ChannelKind::Instagram);
        let err = ch.fetch_media("m1").await.unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported { channel: "instagram", .. }));
    }
}

use async_trait::async_trait;
use lola_core::{Attachment, ChannelKind};

use crate::error::ChannelError;

/// Common interface implemented by every outbound channel adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from the
/// flush tasks of many correspondents at once.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Which network this adapter talks to. Unique within a manager.
    fn kind(&self) -> ChannelKind;

    /// Deliver one text message. Returns the platform message id when the
    /// API reports one.
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Option<String>, ChannelError>;

    /// Show a "typing" indicator to the recipient.
    ///
    /// `in_reply_to` is the inbound message id the indicator is anchored to;
    /// platforms that need one treat `None` as a no-op.
    async fn signal_typing(
        &self,
        recipient: &str,
        in_reply_to: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Download an inbound media item by its platform id.
    async fn fetch_media(&self, _media_id: &str) -> Result<Attachment, ChannelError> {
        Err(ChannelError::Unsupported {
            channel: self.kind().as_str(),
            operation: "fetch_media",
        })
    }
}

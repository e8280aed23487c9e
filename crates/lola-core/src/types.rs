use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat network an inbound event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    WhatsApp,
    Instagram,
    Web,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Instagram => "instagram",
            ChannelKind::Web => "web",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel-scoped chat counterparty.
///
/// The same phone number on two channels is two correspondents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correspondent {
    pub channel: ChannelKind,
    /// Opaque platform address (phone number, IGSID, web session id).
    pub address: String,
}

impl Correspondent {
    pub fn new(channel: ChannelKind, address: impl Into<String>) -> Self {
        Self {
            channel,
            address: address.into(),
        }
    }

    pub fn whatsapp(address: impl Into<String>) -> Self {
        Self::new(ChannelKind::WhatsApp, address)
    }

    pub fn instagram(address: impl Into<String>) -> Self {
        Self::new(ChannelKind::Instagram, address)
    }

    pub fn web(address: impl Into<String>) -> Self {
        Self::new(ChannelKind::Web, address)
    }
}

impl fmt::Display for Correspondent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Inline binary payload forwarded to the completion service.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One message-equivalent unit of conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Copy without the binary payload, for storing in history.
    pub fn without_attachment(&self) -> Self {
        Self {
            role: self.role,
            text: self.text.clone(),
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    /// Spanish noun used in history placeholders (`[audio]`, `[imagen]`).
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "imagen",
            MediaKind::Audio => "audio",
        }
    }

    /// Noun with its article, for user-facing phrases.
    pub fn with_article(&self) -> &'static str {
        match self {
            MediaKind::Image => "la imagen",
            MediaKind::Audio => "el audio",
        }
    }
}

/// Normalised body of an inbound event, independent of provider JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventPayload {
    Text {
        body: String,
    },
    #[serde(rename = "media")]
    Media {
        media: MediaKind,
        media_id: String,
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
}

impl EventPayload {
    /// `text`, `image`, `audio` or `location`.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Text { .. } => "text",
            EventPayload::Media {
                media: MediaKind::Image,
                ..
            } => "image",
            EventPayload::Media {
                media: MediaKind::Audio,
                ..
            } => "audio",
            EventPayload::Location { .. } => "location",
        }
    }
}

/// What the boundary layer hands the core for every inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub correspondent: Correspondent,
    /// Provider message id; some inbound kinds carry none.
    pub message_id: Option<String>,
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn text(correspondent: Correspondent, message_id: Option<&str>, body: &str) -> Self {
        Self {
            correspondent,
            message_id: message_id.map(String::from),
            payload: EventPayload::Text {
                body: body.to_string(),
            },
        }
    }
}

use lola_core::Correspondent;
use serde::{Deserialize, Serialize};

/// Context used for WhatsApp and Instagram sales conversations.
pub const SALES_CONTEXT: &str = "sales";
/// Context used for the web demo chat.
pub const DEMO_CONTEXT: &str = "demo";

/// Identifies one conversation history.
///
/// Histories are channel-scoped: the same phone number on WhatsApp and on
/// the web chat are two keys. The `context` separates conversations with the
/// same correspondent that must never share turns (sales vs. demo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub correspondent: Correspondent,
    pub context: String,
}

impl SessionKey {
    pub fn new(correspondent: Correspondent, context: impl Into<String>) -> Self {
        Self {
            correspondent,
            context: context.into(),
        }
    }

    /// Key for a messaging-channel sales conversation.
    pub fn sales(correspondent: Correspondent) -> Self {
        Self::new(correspondent, SALES_CONTEXT)
    }

    /// Return the canonical string form.
    ///
    /// Format: `{channel}:{address}:{context}`
    pub fn format(&self) -> String {
        format!(
            "{}:{}:{}",
            self.correspondent.channel, self.correspondent.address, self.context
        )
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_channel_address_context() {
        let key = SessionKey::sales(Correspondent::whatsapp("59899123456"));
        assert_eq!(key.to_string(), "whatsapp:59899123456:sales");
    }

    #[test]
    fn contexts_make_distinct_keys() {
        let who = Correspondent::web("s-1");
        assert_ne!(SessionKey::new(who.clone(), DEMO_CONTEXT), SessionKey::sales(who));
    }
}

pub mod channel;
pub mod error;
pub mod instagram;
pub mod manager;
pub mod quote;
pub mod whatsapp;

pub use channel::Channel;
pub use error::ChannelError;
pub use instagram::InstagramChannel;
pub use manager::ChannelManager;
pub use quote::QuoteCache;
pub use whatsapp::WhatsAppChannel;

pub mod config;
pub mod error;
pub mod types;

pub use config::LolaConfig;
pub use error::{LolaError, Result};
pub use types::{
    Attachment, ChannelKind, Correspondent, EventPayload, InboundEvent, MediaKind, Role, Turn,
};

pub mod completer;
pub mod gemini;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod router;

pub use completer::{Completer, Completion};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError};
pub use router::{ProviderRouter, ProviderSlot};

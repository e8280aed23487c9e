use thiserror::Error;

#[derive(Debug, Error)]
pub enum LolaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Completion provider error: {0}")]
    Completion(String),

    #[error("Payment provider error: {0}")]
    Payment(String),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },
}

impl LolaError {
    /// Short error code string returned in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LolaError::Config(_) => "CONFIG_ERROR",
            LolaError::Validation(_) => "VALIDATION_ERROR",
            LolaError::Completion(_) => "COMPLETION_ERROR",
            LolaError::Payment(_) => "PAYMENT_ERROR",
            LolaError::Timeout { .. } => "TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, LolaError>;

use thiserror::Error;

/// Errors raised by the payment provider adapter and the subscriber store.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provider accepted the request but returned no checkout link.
    #[error("provider returned no checkout link")]
    NoLink,

    /// No stored subscription matches the given payer email.
    #[error("no subscription found for {0}")]
    UnknownSubscriber(String),

    /// A notification signature header is missing or does not match.
    #[error("invalid notification signature: {0}")]
    Signature(String),
}

pub type Result<T> = std::result::Result<T, PaymentError>;

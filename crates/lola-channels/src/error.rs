use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The platform API could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The platform rejected the configured access token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Media could not be resolved or downloaded.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// The adapter does not implement this operation.
    #[error("Unsupported by {channel}: {operation}")]
    Unsupported {
        channel: &'static str,
        operation: &'static str,
    },
}

impl ChannelError {
    /// Classify a transport-level `reqwest` failure.
    pub(crate) fn from_transport(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            ChannelError::Timeout { ms: timeout_ms }
        } else {
            ChannelError::ConnectionFailed(err.to_string())
        }
    }
}

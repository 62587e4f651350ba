/*
[INPUT]:  Error sources (URL parsing, WebSocket transport, timeouts, config)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error type for the crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for the price stream client.
///
/// Cloneable so that every caller joined onto the same in-flight
/// connection attempt receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Endpoint URL could not be parsed or uses an unsupported scheme
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// WebSocket handshake or transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection handshake did not finish in time
    #[error("Connection timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Connection attempt aborted by an explicit disconnect
    #[error("Client disconnected")]
    Disconnected,

    /// Outbound command could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection attempt task did not complete
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::WebSocket(_) | StreamError::Timeout { .. } | StreamError::Internal(_)
        )
    }
}

impl From<tungstenite::Error> for StreamError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Url(url_err) => StreamError::InvalidUrl(url_err.to_string()),
            other => StreamError::WebSocket(other.to_string()),
        }
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        StreamError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

/// Result type alias for price stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

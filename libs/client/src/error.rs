//! Error types for the delivery engine.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for the delivery engine.
///
/// None of these ever reach façade callers: the public operations are
/// fire-and-forget and handle every failure internally (reconnect, drop, or
/// no-op). The taxonomy exists for the internal policy decisions and for
/// transport implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure while opening, sending, or receiving.
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The session is closed; sends and receives are no longer possible.
    #[error("session closed")]
    Closed,

    /// A payload could not be encoded. Unreachable for the envelopes the
    /// engine builds itself, kept for defect visibility.
    #[error("failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No usable collector endpoint. Degrades the engine to a no-op rather
    /// than failing hard.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether a reconnect may clear this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::WebSocket(_) | ClientError::Closed
        )
    }

    /// Create a transport error from any displayable reason.
    pub fn transport(reason: impl Into<String>) -> Self {
        ClientError::Transport(reason.into())
    }
}

//! Error taxonomy for the delivery pipeline.
//!
//! Only [`SessionError::Auth`], [`SessionError::Endpoint`],
//! [`SessionError::NotConnected`] and [`SessionError::Encode`] ever reach
//! callers of the session API. Handshake
//! and transport failures are recovered by the reconnect state machine and
//! only show up as `last_error` and in the logs. Decode and presentation
//! failures are logged and swallowed by the dispatcher and presenter
//! respectively.

// Rust guideline compliant 2026-02

use thiserror::Error;

/// Errors produced by the transport session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No token, or the server rejected the token. Fatal, never retried.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The endpoint URL is unusable. Fatal, never retried.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    /// Protocol-level handshake failed in a way that is worth retrying.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Physical connection dropped or went silent.
    #[error("transport error: {0}")]
    Transport(String),
    /// Publish attempted while the session is not `Connected`.
    #[error("session is not connected")]
    NotConnected,
    /// Publish payload could not be serialized to JSON.
    #[error("payload could not be encoded: {0}")]
    Encode(String),
}

impl SessionError {
    /// Whether the reconnect loop may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::Transport(_))
    }
}

/// Malformed inbound frame or payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The raw text could not be parsed as a protocol frame.
    #[error("malformed frame: {0}")]
    Frame(String),
    /// A required header was missing from the frame.
    #[error("frame is missing header `{0}`")]
    MissingHeader(&'static str),
    /// The frame body was not the expected JSON shape.
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

/// Failure reported by the notification platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentationError {
    /// The environment has no notification support at all.
    #[error("notifications are not supported in this environment")]
    Unsupported,
    /// The platform refused or failed to show, close or open something.
    #[error("notification platform error: {0}")]
    Platform(String),
}

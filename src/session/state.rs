//! Connection state of a session.

use std::time::Duration;

/// Where the session is in its lifecycle.
///
/// ```text
/// Disconnected ──connect()──► Connecting ──CONNECTED──► Connected
///                               │    ▲                      │
///              handshake failed │    │ backoff elapsed      │ close / silence
///                               ▼    │                      │
///                             Reconnecting ◄────────────────┘
///
/// any ──auth rejected / credentials revoked──► Failed
/// any ──disconnect()──► Disconnected
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// WebSocket open + STOMP handshake in progress.
    Connecting,
    /// Handshake acknowledged; subscriptions replayed.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting {
        /// Consecutive failed attempts so far (1-based).
        attempt: u32,
        /// Delay before the next attempt.
        retry_in: Duration,
    },
    /// Stopped after an unrecoverable auth failure.
    Failed,
}

impl ConnectionState {
    /// `true` only in `Connected`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `true` while a driver is working on the link.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting { .. }
        )
    }

    /// `true` for `Disconnected` and `Failed`; only `connect()` leaves them.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Short name without payload.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconnecting { attempt, retry_in } => write!(
                f,
                "reconnecting (attempt {attempt}, retry in {:.1}s)",
                retry_in.as_secs_f32()
            ),
            other => f.write_str(other.name()),
        }
    }
}

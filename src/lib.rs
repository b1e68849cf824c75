//! SNet realtime - message and notification delivery client.
//!
//! Keeps one self-healing STOMP-over-WebSocket link to the SNet messaging
//! server, routes deliveries to per-topic handlers and turns chat events into
//! de-duplicated user notifications.
//!
//! # Architecture
//!
//! ```text
//! CredentialProvider ─► Session (handshake, heart-beats, reconnect)
//!                          │
//!                          ▼
//!                 SubscriptionRegistry (replayed on every link)
//!                          │
//!                          ▼
//!                     Dispatcher ─► handlers ─► NotificationPresenter
//!                                                      ▲
//!                         BackgroundDelivery (push) ───┘
//! ```
//!
//! # Modules
//!
//! - [`session`] - Transport session and reconnect state machine
//! - [`registry`] - Topic → handler map with per-link bindings
//! - [`dispatch`] - Inbound decoding and routing, outbound chat payloads
//! - [`notify`] - Notification presenter and platform boundary
//! - [`push`] - Background push payload contract
//! - [`chat`] - Inbox/presence glue and message sending
//! - [`stomp`] - STOMP frame codec
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod chat;
pub mod credentials;
pub mod dispatch;
pub mod notify;
pub mod push;
pub mod registry;
pub mod session;
pub mod stomp;
pub mod target;
pub mod ws;

pub mod config;
pub mod constants;
pub mod env;
pub mod error;

// Re-export commonly used types
pub use chat::{ChatEvent, ChatIdentity, ChatService, Topics};
pub use config::Config;
pub use credentials::{CredentialProvider, EnvToken, SharedToken};
pub use dispatch::{ChatMessage, Diagnostics, InboundMessage, OutboundMessage};
pub use error::{DecodeError, PresentationError, SessionError};
pub use notify::{NotificationKind, NotificationPlatform, NotificationPresenter, Permission};
pub use push::{BackgroundDelivery, PushPayload};
pub use session::{ConnectionState, Session, SessionConfig, SubscriptionHandle};

/// Lock a mutex, recovering the data if a holder panicked.
///
/// Handlers run user code; one panicking handler must not wedge the session.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

//! Application-wide constants for the delivery pipeline.
//!
//! Defaults live here so the config layer, the session and the presenter
//! agree on them. Constants are grouped by component.

use std::time::Duration;

// ============================================================================
// Endpoints & Topics
// ============================================================================

/// Default messaging server.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8086";

/// WebSocket leg of the server's SockJS endpoint (`/ws`).
pub const DEFAULT_WS_PATH: &str = "/ws/websocket";

/// Private per-user inbound topic.
pub const INBOX_TOPIC: &str = "/user/queue/messages";

/// Broadcast topic carrying the online-users list.
pub const PRESENCE_TOPIC: &str = "/topic/online-users";

/// Outbound destination for chat messages.
pub const SEND_DESTINATION: &str = "/app/chat.send";

// ============================================================================
// Transport Session
// ============================================================================

/// How often the client promises to send heart-beats.
pub const HEARTBEAT_OUTGOING: Duration = Duration::from_millis(4000);

/// How often the client asks the server to send heart-beats.
pub const HEARTBEAT_INCOMING: Duration = Duration::from_millis(4000);

/// Consecutive silent incoming intervals before the link is declared dead.
pub const MISSED_HEARTBEATS_LIMIT: u32 = 2;

/// Upper bound on WebSocket open + `CONNECTED` acknowledgment.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// First reconnect delay.
pub const RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
pub const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Growth factor between reconnect attempts.
pub const RECONNECT_FACTOR: u32 = 2;

/// Per-subscription queue depth for channel-backed handlers.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Capacity of the state transition broadcast.
pub const TRANSITION_BUFFER: usize = 64;

// ============================================================================
// Notifications
// ============================================================================

/// Name used as the default notification title.
pub const APP_NAME: &str = "SNet";

/// Icon used when the sender has no avatar.
pub const DEFAULT_ICON: &str = "/logo.png";

/// Icon and badge of background pushes.
pub const PUSH_ICON: &str = "/icon-192.svg";

/// Body shown for background pushes that carry none.
pub const DEFAULT_PUSH_BODY: &str = "You have a new message";

/// Tag used for background pushes that carry none.
pub const DEFAULT_PUSH_TAG: &str = "message";

/// Maximum notification body length in characters before truncation.
pub const MAX_BODY_CHARS: usize = 100;

/// Marker appended to truncated bodies.
pub const ELLIPSIS: &str = "...";

/// Delay before a foreground notification closes itself.
pub const AUTO_CLOSE_DELAY: Duration = Duration::from_secs(5);

/// Route that opens the chat screen.
pub const CHAT_ROUTE: &str = "/dashboard/chat";

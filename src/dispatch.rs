//! Message dispatcher.
//!
//! Decodes inbound STOMP traffic into [`InboundMessage`]s and routes each one
//! to the handler registered for its topic. Also defines the outbound chat
//! payload published to the send destination.
//!
//! # Failure handling
//!
//! - No handler for the topic: dropped, logged at `trace`. This happens
//!   legitimately when a delivery races an unsubscribe.
//! - Malformed frame or body: reported to the [`Diagnostics`] sink and
//!   dropped. Other frames in the same WebSocket message and other topics are
//!   unaffected.
//! - Channel-backed handler whose receiver was dropped: its registration is
//!   removed (unless it was replaced in the meantime).

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{DecodeError, PresentationError};
use crate::registry::{Delivery, LinkId, SubscriptionRegistry};
use crate::stomp::{self, Command, Frame};

/// One delivery taken off the wire.
///
/// Handed to exactly one handler and never buffered by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Topic the message was delivered on.
    pub topic: String,
    /// Server-assigned `message-id`, when present.
    pub message_id: Option<String>,
    /// `senderId` of chat payloads.
    pub sender_id: Option<i64>,
    /// `content` of chat payloads, empty otherwise.
    pub content: String,
    /// `type` of chat payloads (`TEXT` when absent).
    pub message_type: String,
    /// Full decoded JSON body.
    pub payload: serde_json::Value,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Decode a MESSAGE frame.
    pub fn from_frame(frame: &Frame, received_at: DateTime<Utc>) -> Result<Self, DecodeError> {
        if frame.command != Command::Message {
            return Err(DecodeError::Frame(format!(
                "expected MESSAGE, got {}",
                frame.command
            )));
        }
        let topic = frame.require("destination")?.to_string();
        let payload: serde_json::Value = serde_json::from_str(&frame.body)?;

        let sender_id = payload.get("senderId").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        });
        let content = payload
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message_type = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(DEFAULT_MESSAGE_TYPE)
            .to_string();

        Ok(Self {
            topic,
            message_id: frame.get("message-id").map(str::to_string),
            sender_id,
            content,
            message_type,
            payload,
            received_at,
        })
    }

    /// Typed view of a chat delivery.
    pub fn chat(&self) -> Result<ChatMessage, DecodeError> {
        Ok(ChatMessage::deserialize(&self.payload)?)
    }

    /// Typed view of a presence delivery (list of online user emails).
    pub fn online_users(&self) -> Result<Vec<String>, DecodeError> {
        Ok(Vec::<String>::deserialize(&self.payload)?)
    }
}

/// Message type used when a payload does not say.
pub const DEFAULT_MESSAGE_TYPE: &str = "TEXT";

/// Message type for file attachments.
pub const FILE_MESSAGE_TYPE: &str = "FILE";

/// Chat message as delivered on the private inbox.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server message id.
    #[serde(default)]
    pub id: Option<i64>,
    /// Author.
    pub sender_id: i64,
    /// Author display name.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Recipient for direct messages.
    #[serde(default)]
    pub receiver_id: Option<i64>,
    /// Group for group messages.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// `TEXT`, `FILE`, ...
    #[serde(rename = "type", default = "default_type")]
    pub message_type: String,
    /// Attached file id.
    #[serde(default)]
    pub file_id: Option<i64>,
    /// Attached file name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Server send time, as sent.
    #[serde(default)]
    pub sent_at: Option<String>,
}

fn default_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

impl ChatMessage {
    /// Direct (one-to-one) message rather than a group message.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.receiver_id.is_some() && self.group_id.is_none()
    }

    /// File attachment with a usable name.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.message_type == FILE_MESSAGE_TYPE && self.file_name.is_some()
    }
}

/// Payload published to the send destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Direct recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<i64>,
    /// Target group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    /// Text content.
    pub content: String,
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Attached, already uploaded file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
}

impl OutboundMessage {
    /// Direct text message.
    pub fn direct(receiver_id: i64, content: impl Into<String>) -> Self {
        Self {
            receiver_id: Some(receiver_id),
            group_id: None,
            content: content.into(),
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            file_id: None,
        }
    }

    /// Group text message.
    pub fn group(group_id: i64, content: impl Into<String>) -> Self {
        Self {
            receiver_id: None,
            group_id: Some(group_id),
            content: content.into(),
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            file_id: None,
        }
    }

    /// Override the message type (ignored once a file is attached).
    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        if self.file_id.is_none() {
            self.message_type = message_type.into();
        }
        self
    }

    /// Attach an uploaded file; the type becomes `FILE`.
    pub fn with_file(mut self, file_id: i64) -> Self {
        self.file_id = Some(file_id);
        self.message_type = FILE_MESSAGE_TYPE.to_string();
        self
    }
}

/// Sink for failures the pipeline swallows.
///
/// The defaults log at `warn`; applications can count or forward them.
pub trait Diagnostics: Send + Sync + std::fmt::Debug {
    /// An inbound frame or payload could not be decoded and was dropped.
    fn decode_failed(&self, topic: Option<&str>, error: &DecodeError) {
        log::warn!(
            "[Dispatch] Dropping undecodable frame (topic={}): {}",
            topic.unwrap_or("unknown"),
            error
        );
    }

    /// A notification could not be shown, closed or opened.
    fn presentation_failed(&self, key: &str, error: &PresentationError) {
        log::warn!("[Notify] Presentation failed for {}: {}", key, error);
    }
}

/// [`Diagnostics`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {}

/// What happened to one MESSAGE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler received it.
    Delivered {
        /// Topic it was delivered on.
        topic: String,
    },
    /// The channel-backed subscriber was gone; its registration was removed.
    SubscriberGone {
        /// Topic that was unsubscribed.
        topic: String,
    },
    /// Nobody is registered for the topic.
    NoHandler,
    /// It could not be decoded.
    Malformed,
}

/// A frame addressed to one specific physical link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Link the frame belongs to; stale links drop it.
    pub link: LinkId,
    /// Frame to write.
    pub frame: Frame,
}

/// Routes decoded deliveries to registered handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Mutex<SubscriptionRegistry>>,
    diagnostics: Arc<dyn Diagnostics>,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

impl Dispatcher {
    /// Dispatcher over a shared registry.
    pub fn new(
        registry: Arc<Mutex<SubscriptionRegistry>>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            registry,
            diagnostics,
            outbound: None,
        }
    }

    /// Queue for frames the dispatcher itself must send (UNSUBSCRIBE of a
    /// subscriber that went away).
    pub fn with_outbound(mut self, outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Decode one WebSocket text message and dispatch every MESSAGE frame.
    ///
    /// Non-MESSAGE frames (CONNECTED, RECEIPT, ERROR) are returned for the
    /// session to act on. An undecodable frame is reported and skipped; the
    /// rest of the message is still dispatched.
    pub fn dispatch_raw(&self, raw: &str) -> Vec<Frame> {
        let mut control = Vec::new();
        for decoded in stomp::decode_each(raw) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    self.diagnostics.decode_failed(None, &e);
                    continue;
                }
            };
            if frame.command == Command::Message {
                self.dispatch(&frame);
            } else {
                control.push(frame);
            }
        }
        control
    }

    /// Route one MESSAGE frame to its handler.
    ///
    /// The registry lock is released before the handler runs, so handlers may
    /// call back into the session (subscribe, unsubscribe, publish).
    pub fn dispatch(&self, frame: &Frame) -> DispatchOutcome {
        let message = match InboundMessage::from_frame(frame, Utc::now()) {
            Ok(message) => message,
            Err(e) => {
                self.diagnostics.decode_failed(frame.get("destination"), &e);
                return DispatchOutcome::Malformed;
            }
        };

        let resolved = match self.registry.lock() {
            Ok(registry) => registry.resolve(frame.get("subscription"), &message.topic),
            Err(_) => {
                log::error!("[Dispatch] Registry lock poisoned, dropping message");
                return DispatchOutcome::NoHandler;
            }
        };

        let Some((topic, id, handler)) = resolved else {
            log::trace!("[Dispatch] No handler for {}, dropping", message.topic);
            return DispatchOutcome::NoHandler;
        };

        let delivery = match handler.lock() {
            Ok(mut handler) => handler.deliver(message),
            Err(_) => {
                log::error!("[Dispatch] Handler for {} panicked earlier, dropping", topic);
                return DispatchOutcome::NoHandler;
            }
        };

        if delivery == Delivery::Delivered {
            return DispatchOutcome::Delivered { topic };
        }

        log::info!("[Dispatch] Subscriber for {} went away, unsubscribing", topic);
        let unsubscribe = self
            .registry
            .lock()
            .ok()
            .and_then(|mut registry| registry.unregister_if(&topic, id));
        if let (Some((link, frame)), Some(outbound)) = (unsubscribe, &self.outbound) {
            if outbound.send(OutboundFrame { link, frame }).is_err() {
                log::debug!("[Dispatch] Link already gone, UNSUBSCRIBE not sent");
            }
        }
        DispatchOutcome::SubscriberGone { topic }
    }
}

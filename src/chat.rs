//! Chat glue between the session and the presenter.
//!
//! Subscribes the private inbox and the presence broadcast, turns direct
//! messages from other users into notifications, keeps the online-users list
//! and publishes outgoing chat messages.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::constants::{INBOX_TOPIC, PRESENCE_TOPIC, SEND_DESTINATION, SUBSCRIPTION_BUFFER};
use crate::dispatch::{ChatMessage, InboundMessage, OutboundMessage};
use crate::error::SessionError;
use crate::notify::{NotificationKind, NotificationPresenter, PresentOptions};
use crate::session::{Session, SubscriptionHandle};

/// Topic names used by the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Private per-user inbound topic.
    pub inbox: String,
    /// Online-users broadcast.
    pub presence: String,
    /// Outbound send destination.
    pub send: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            inbox: INBOX_TOPIC.to_string(),
            presence: PRESENCE_TOPIC.to_string(),
            send: SEND_DESTINATION.to_string(),
        }
    }
}

/// Who "we" are, for the notify rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatIdentity {
    /// Signed-in user; their own echoes never notify.
    pub user_id: Option<i64>,
    /// REST base for avatar URLs (`{base}/api/users/{id}/avatar?size=medium`).
    pub server_url: Option<String>,
}

impl ChatIdentity {
    /// Avatar URL for `user_id`, when a server is known.
    #[must_use]
    pub fn avatar_url(&self, user_id: i64) -> Option<String> {
        self.server_url.as_ref().map(|base| {
            format!(
                "{}/api/users/{}/avatar?size=medium",
                base.trim_end_matches('/'),
                user_id
            )
        })
    }
}

/// What the chat observed, for a front end to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message arrived on the inbox.
    Message(ChatMessage),
    /// The online-users list changed.
    Presence(Vec<String>),
}

/// Notification to raise for a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Record kind.
    pub kind: NotificationKind,
    /// Sender id.
    pub sender_id: i64,
    /// Sender display name.
    pub sender_name: String,
    /// Message text.
    pub content: String,
    /// Avatar and file details.
    pub options: PresentOptions,
}

/// Decide whether `message` notifies, and how.
///
/// Own messages and group messages never do. File messages with a name use
/// the file kind.
#[must_use]
pub fn notification_for(message: &ChatMessage, identity: &ChatIdentity) -> Option<NotificationRequest> {
    if identity.user_id == Some(message.sender_id) || !message.is_direct() {
        return None;
    }

    let sender_name = message
        .sender_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("User {}", message.sender_id));
    let kind = if message.is_file() {
        NotificationKind::File
    } else {
        NotificationKind::Message
    };

    Some(NotificationRequest {
        kind,
        sender_id: message.sender_id,
        sender_name,
        content: message.content.clone(),
        options: PresentOptions {
            avatar: identity.avatar_url(message.sender_id),
            verified: false,
            file_name: message.file_name.clone(),
        },
    })
}

/// Chat subscriptions on top of a [`Session`].
#[derive(Debug)]
pub struct ChatService {
    session: Session,
    presenter: NotificationPresenter,
    identity: ChatIdentity,
    topics: Topics,
    online: Arc<RwLock<Vec<String>>>,
    events: broadcast::Sender<ChatEvent>,
    handles: Vec<SubscriptionHandle>,
}

impl ChatService {
    /// Service over `session`; call [`ChatService::start`] to subscribe.
    pub fn new(
        session: Session,
        presenter: NotificationPresenter,
        identity: ChatIdentity,
        topics: Topics,
    ) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            session,
            presenter,
            identity,
            topics,
            online: Arc::new(RwLock::new(Vec::new())),
            events,
            handles: Vec::new(),
        }
    }

    /// Register the inbox and presence handlers. Idempotent.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }

        let presenter = self.presenter.clone();
        let identity = self.identity.clone();
        let events = self.events.clone();
        let inbox = self.session.subscribe(&self.topics.inbox, move |message| {
            on_inbox(&message, &presenter, &identity, &events);
        });

        let online = Arc::clone(&self.online);
        let events = self.events.clone();
        let presence = self.session.subscribe(&self.topics.presence, move |message| {
            on_presence(&message, &online, &events);
        });

        log::info!(
            "[Chat] Listening on {} and {}",
            self.topics.inbox,
            self.topics.presence
        );
        self.handles = vec![inbox, presence];
    }

    /// Drop the chat subscriptions.
    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.unsubscribe();
        }
    }

    /// Observe inbox and presence traffic.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Latest online-users list.
    #[must_use]
    pub fn online_users(&self) -> Vec<String> {
        self.online
            .read()
            .map(|users| users.clone())
            .unwrap_or_default()
    }

    /// Send a direct message, optionally with an uploaded file.
    pub fn send_message(
        &self,
        receiver_id: i64,
        content: &str,
        file_id: Option<i64>,
    ) -> Result<(), SessionError> {
        let mut message = OutboundMessage::direct(receiver_id, content);
        if let Some(file_id) = file_id {
            message = message.with_file(file_id);
        }
        self.session.publish(&self.topics.send, &message)
    }

    /// Send a group message, optionally with an uploaded file.
    pub fn send_group_message(
        &self,
        group_id: i64,
        content: &str,
        file_id: Option<i64>,
    ) -> Result<(), SessionError> {
        let mut message = OutboundMessage::group(group_id, content);
        if let Some(file_id) = file_id {
            message = message.with_file(file_id);
        }
        self.session.publish(&self.topics.send, &message)
    }
}

fn on_inbox(
    message: &InboundMessage,
    presenter: &NotificationPresenter,
    identity: &ChatIdentity,
    events: &broadcast::Sender<ChatEvent>,
) {
    let chat = match message.chat() {
        Ok(chat) => chat,
        Err(e) => {
            log::warn!("[Chat] Ignoring inbox delivery: {}", e);
            return;
        }
    };

    if let Some(request) = notification_for(&chat, identity) {
        let outcome = presenter.present(
            request.kind,
            request.sender_id,
            &request.sender_name,
            &request.content,
            &request.options,
        );
        log::debug!("[Chat] Notification for {}: {:?}", chat.sender_id, outcome);
    }
    let _ = events.send(ChatEvent::Message(chat));
}

fn on_presence(
    message: &InboundMessage,
    online: &RwLock<Vec<String>>,
    events: &broadcast::Sender<ChatEvent>,
) {
    let users = message.online_users().unwrap_or_else(|e| {
        log::warn!("[Chat] Bad presence payload, clearing list: {}", e);
        Vec::new()
    });
    log::debug!("[Chat] {} user(s) online", users.len());
    if let Ok(mut guard) = online.write() {
        guard.clone_from(&users);
    }
    let _ = events.send(ChatEvent::Presence(users));
}

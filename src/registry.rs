//! Subscription registry.
//!
//! Maps logical topics to delivery handlers independently of the physical
//! link. Each entry may additionally carry a *binding*: the STOMP
//! subscription id under which the topic is subscribed on the current link.
//!
//! ```text
//!   register("/topic/a") ──► entries["/topic/a"] = { id, handler, binding }
//!                                                              │
//!   attach(link) ── replays every entry ──► SUBSCRIBE id:sub-N ┘
//!   detach()     ── drops every binding, keeps every entry
//! ```
//!
//! The registry never performs I/O: operations return the frames the caller
//! must write to the link identified by the returned [`LinkId`]. Frames for a
//! link that has since been replaced must be discarded, since the new link
//! already received a full replay.

// Rust guideline compliant 2026-02

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::dispatch::InboundMessage;
use crate::stomp::{Command, Frame};

/// Identity of one registration, used to tell a replaced handler apart
/// from its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Identity of one physical link (one successful handshake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

/// Result of handing a message to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The handler accepted the message.
    Delivered,
    /// The handler is gone (its receiver was dropped).
    Closed,
}

/// Delivery callback for one topic.
pub enum Handler {
    /// Plain callback, invoked synchronously on the dispatch path.
    Callback(Box<dyn FnMut(InboundMessage) + Send>),
    /// Bounded queue drained by the subscriber.
    Channel(mpsc::Sender<InboundMessage>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Handler::Callback"),
            Self::Channel(_) => f.write_str("Handler::Channel"),
        }
    }
}

impl Handler {
    /// Wrap a closure.
    pub fn callback(f: impl FnMut(InboundMessage) + Send + 'static) -> Self {
        Self::Callback(Box::new(f))
    }

    /// Hand `message` to the handler.
    pub fn deliver(&mut self, message: InboundMessage) -> Delivery {
        match self {
            Self::Callback(f) => {
                f(message);
                Delivery::Delivered
            }
            Self::Channel(tx) => match tx.try_send(message) {
                Ok(()) => Delivery::Delivered,
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    log::warn!(
                        "[Registry] Subscriber queue full, dropping message on {}",
                        dropped.topic
                    );
                    Delivery::Delivered
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }
}

/// Handler shared between the registry and an in-flight dispatch.
///
/// The mutex serializes invocations for one topic; the registry lock is never
/// held while a handler runs.
pub type SharedHandler = Arc<Mutex<Handler>>;

#[derive(Debug)]
struct Entry {
    id: SubscriptionId,
    handler: SharedHandler,
    binding: Option<String>,
}

/// Topic → handler map plus the bindings of the current link.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Entry>,
    /// binding id → topic, for the current link only.
    bindings: HashMap<String, String>,
    link: Option<LinkId>,
    next_subscription: u64,
    next_binding: u64,
}

impl SubscriptionRegistry {
    /// Empty registry with no link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the handler for `topic`.
    ///
    /// Replacing keeps an existing binding (the server-side subscription is
    /// for the same destination). A new topic is bound immediately when a
    /// link is attached, in which case the SUBSCRIBE frame is returned.
    pub fn register(
        &mut self,
        topic: &str,
        handler: Handler,
    ) -> (SubscriptionId, Option<(LinkId, Frame)>) {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        let handler = Arc::new(Mutex::new(handler));

        if let Some(entry) = self.entries.get_mut(topic) {
            log::debug!("[Registry] Replacing handler for {}", topic);
            entry.id = id;
            entry.handler = handler;
            return (id, None);
        }

        self.entries.insert(
            topic.to_string(),
            Entry {
                id,
                handler,
                binding: None,
            },
        );
        let bind = match self.link {
            Some(link) => self.bind(topic).map(|frame| (link, frame)),
            None => None,
        };
        (id, bind)
    }

    /// Remove `topic`. Returns the UNSUBSCRIBE frame when it was bound.
    pub fn unregister(&mut self, topic: &str) -> Option<(LinkId, Frame)> {
        let entry = self.entries.remove(topic)?;
        log::debug!("[Registry] Unregistered {}", topic);
        let binding = entry.binding?;
        self.bindings.remove(&binding);
        let link = self.link?;
        Some((
            link,
            Frame::new(Command::Unsubscribe).header("id", binding),
        ))
    }

    /// Remove `topic` only if it is still registered under `id`.
    pub fn unregister_if(&mut self, topic: &str, id: SubscriptionId) -> Option<(LinkId, Frame)> {
        if self.entries.get(topic).is_some_and(|e| e.id == id) {
            self.unregister(topic)
        } else {
            None
        }
    }

    /// Start a new link: every registered topic is bound afresh.
    ///
    /// Binding ids restart at `sub-0` per link. Topics are replayed in sorted
    /// order so the wire sequence is deterministic.
    pub fn attach(&mut self, link: LinkId) -> Vec<Frame> {
        self.detach();
        self.link = Some(link);

        let mut topics: Vec<String> = self.entries.keys().cloned().collect();
        topics.sort();
        let frames: Vec<Frame> = topics.iter().filter_map(|t| self.bind(t)).collect();
        log::info!(
            "[Registry] Replaying {} subscription(s) on link {}",
            frames.len(),
            link.0
        );
        frames
    }

    /// Forget the current link and all of its bindings.
    pub fn detach(&mut self) {
        self.link = None;
        self.bindings.clear();
        self.next_binding = 0;
        for entry in self.entries.values_mut() {
            entry.binding = None;
        }
    }

    /// Currently attached link.
    #[must_use]
    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// Find the handler for an inbound delivery.
    ///
    /// The binding id wins; the destination is the fallback for servers that
    /// omit the `subscription` header.
    #[must_use]
    pub fn resolve(
        &self,
        binding: Option<&str>,
        destination: &str,
    ) -> Option<(String, SubscriptionId, SharedHandler)> {
        let topic = binding
            .and_then(|b| self.bindings.get(b))
            .map_or(destination, String::as_str);
        self.entries
            .get(topic)
            .map(|e| (topic.to_string(), e.id, Arc::clone(&e.handler)))
    }

    /// Registered topics.
    #[must_use]
    pub fn topics(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Topics bound on the current link.
    #[must_use]
    pub fn bound_topics(&self) -> BTreeSet<String> {
        self.bindings.values().cloned().collect()
    }

    /// Whether `topic` is registered.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bind(&mut self, topic: &str) -> Option<Frame> {
        let entry = self.entries.get_mut(topic)?;
        let binding = format!("sub-{}", self.next_binding);
        self.next_binding += 1;
        entry.binding = Some(binding.clone());
        self.bindings.insert(binding.clone(), topic.to_string());
        Some(
            Frame::new(Command::Subscribe)
                .header("id", binding)
                .header("destination", topic)
                .header("ack", "auto"),
        )
    }
}

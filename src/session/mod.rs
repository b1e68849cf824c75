//! Transport session: one logical, self-healing STOMP link.
//!
//! A [`Session`] owns a background driver task that opens the WebSocket,
//! performs the STOMP handshake, supervises heart-beats and reconnects with
//! backoff whenever the link drops. Subscriptions are registered against
//! logical topics and survive every reconnect; the driver replays them on
//! each new link before reporting `Connected`.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Session (Clone handle)                                       │
//! │   connect() / disconnect() / publish() / subscribe()          │
//! └──────┬───────────────────────────────▲────────────────────────┘
//!        │ OutboundFrame (unbounded)      │ watch<ConnectionState>
//! ┌──────▼───────────────────────────────┴────────────────────────┐
//! │  driver task                                                  │
//! │   handshake ─► attach/replay ─► message loop ─► backoff ─► …  │
//! │                                    │                          │
//! │                                    ▼                          │
//! │                          Dispatcher ─► handlers               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `disconnect()` and `revoke_credentials()` cancel the driver while holding
//! the state lock, so no transition the driver attempts afterwards can land.
//! Both are idempotent.

// Rust guideline compliant 2026-02

mod backoff;
mod driver;
mod liveness;
mod state;

pub use backoff::{Backoff, Jitter};
pub use liveness::Liveness;
pub use state::ConnectionState;

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{
    HANDSHAKE_TIMEOUT, HEARTBEAT_INCOMING, HEARTBEAT_OUTGOING, MISSED_HEARTBEATS_LIMIT,
    SUBSCRIPTION_BUFFER, TRANSITION_BUFFER,
};
use crate::credentials::CredentialProvider;
use crate::dispatch::{Diagnostics, InboundMessage, LogDiagnostics, OutboundFrame};
use crate::error::SessionError;
use crate::lock;
use crate::registry::{Handler, LinkId, SubscriptionId, SubscriptionRegistry};
use crate::stomp::{Command, Frame, HeartBeat};

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full WebSocket URL of the STOMP endpoint (`ws://…/ws/websocket`).
    pub endpoint: String,
    /// Heart-beat intervals offered in CONNECT.
    pub heartbeat: HeartBeat,
    /// Silent incoming intervals tolerated before the link is dropped.
    pub missed_heartbeats: u32,
    /// Bound on WebSocket open + CONNECTED.
    pub handshake_timeout: Duration,
    /// Reconnect delay policy.
    pub backoff: Backoff,
}

impl SessionConfig {
    /// Defaults for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat: HeartBeat::new(HEARTBEAT_OUTGOING, HEARTBEAT_INCOMING),
            missed_heartbeats: MISSED_HEARTBEATS_LIMIT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            backoff: Backoff::default(),
        }
    }

    /// Value for the STOMP `host` header: the endpoint's host name.
    #[must_use]
    pub fn virtual_host(&self) -> String {
        let rest = self
            .endpoint
            .split_once("://")
            .map_or(self.endpoint.as_str(), |(_, rest)| rest);
        let authority = rest.split(['/', '?']).next().unwrap_or(rest);
        let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        match authority.strip_prefix('[') {
            Some(v6) => v6.split(']').next().unwrap_or(v6).to_string(),
            None => authority.split(':').next().unwrap_or(authority).to_string(),
        }
    }
}

/// Per-connect driver resources.
#[derive(Debug)]
struct Runtime {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    task: JoinHandle<()>,
}

/// State shared between the handles and the driver.
#[derive(Debug)]
struct Shared {
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,
    diagnostics: Arc<dyn Diagnostics>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    last_error: Mutex<Option<SessionError>>,
    runtime: Mutex<Option<Runtime>>,
    next_link: AtomicU64,
}

impl Shared {
    /// Enter `next` unless `cancel` has fired. Returns whether the state changed.
    ///
    /// The cancellation check runs under the watch lock, which is the same
    /// lock `disconnect()` cancels under.
    fn transition(&self, cancel: &CancellationToken, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() || *current == next {
                return false;
            }
            log::info!("[Session] {} -> {}", current, next);
            *current = next.clone();
            // Inside the lock so subscribers observe transitions in order.
            let _ = self.transitions.send(next.clone());
            true
        })
    }

    /// Cancel `runtime` and force `next`, atomically with respect to the driver.
    ///
    /// Callers hold the runtime lock so no new driver can attach meanwhile.
    /// Cancel the driver and enter `next`. Returns the driver task so a
    /// caller may wait for it to flush.
    fn stop(&self, runtime: Option<Runtime>, next: ConnectionState) -> Option<JoinHandle<()>> {
        self.state.send_if_modified(|current| {
            if let Some(runtime) = &runtime {
                runtime.cancel.cancel();
            }
            if *current == next {
                return false;
            }
            log::info!("[Session] {} -> {}", current, next);
            *current = next.clone();
            let _ = self.transitions.send(next.clone());
            true
        });
        lock(&self.registry).detach();
        runtime.map(|runtime| runtime.task)
    }

    fn record_error(&self, error: SessionError) {
        *lock(&self.last_error) = Some(error);
    }

    fn send_frame(&self, link: LinkId, frame: Frame) {
        let runtime = lock(&self.runtime);
        let Some(runtime) = runtime.as_ref() else {
            return;
        };
        if runtime.outbound.send(OutboundFrame { link, frame }).is_err() {
            log::debug!("[Session] Driver gone, dropping frame for link {}", link.0);
        }
    }
}

/// Handle to a logical STOMP link. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Session with log-only diagnostics.
    pub fn new(config: SessionConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_diagnostics(config, credentials, Arc::new(LogDiagnostics))
    }

    /// Session reporting swallowed failures to `diagnostics`.
    pub fn with_diagnostics(
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            shared: Arc::new(Shared {
                config,
                credentials,
                diagnostics,
                registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
                state,
                transitions,
                last_error: Mutex::new(None),
                runtime: Mutex::new(None),
                next_link: AtomicU64::new(0),
            }),
        }
    }

    /// Start the driver and wait for the first handshake outcome.
    ///
    /// Returns `Ok(())` once connected, or once the first attempt failed in a
    /// retryable way (the driver keeps retrying in the background). A no-op
    /// while the session is already active.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] when no token is available, the token cannot be
    /// sent or the server rejects it. [`SessionError::Endpoint`] when the
    /// configured URL can never be connected to. Either way the session is
    /// then `Failed` and does not retry.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.shared.credentials.token().is_none() {
            let error = SessionError::Auth("no token available".to_string());
            self.shared.record_error(error.clone());
            return Err(error);
        }

        let first = {
            let mut runtime = lock(&self.shared.runtime);
            if let Some(current) = runtime.take() {
                let live = !current.cancel.is_cancelled() && !current.task.is_finished();
                if live && !self.state().is_terminal() {
                    log::debug!("[Session] connect() while active, ignoring");
                    *runtime = Some(current);
                    return Ok(());
                }
                current.cancel.cancel();
            }

            *lock(&self.shared.last_error) = None;
            let cancel = CancellationToken::new();
            self.shared.transition(&cancel, ConnectionState::Connecting);

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (first_tx, first_rx) = oneshot::channel();
            let task = tokio::spawn(driver::run(
                Arc::clone(&self.shared),
                cancel.clone(),
                outbound_rx,
                outbound_tx.clone(),
                first_tx,
            ));
            *runtime = Some(Runtime {
                cancel,
                outbound: outbound_tx,
                task,
            });
            first_rx
        };

        match first.await {
            Ok(result) => result,
            // Driver cancelled before any outcome.
            Err(_cancelled) => Ok(()),
        }
    }

    /// Stop the driver, close the link and enter `Disconnected`.
    ///
    /// Cancels any pending reconnect. Subscriptions stay registered and are
    /// replayed on the next `connect()`.
    pub fn disconnect(&self) {
        let mut runtime = lock(&self.shared.runtime);
        if runtime.is_none() && self.state() == ConnectionState::Disconnected {
            return;
        }
        log::info!("[Session] Disconnect requested");
        self.shared.stop(runtime.take(), ConnectionState::Disconnected);
    }

    /// [`disconnect`](Self::disconnect), then wait until the driver has
    /// written every frame already published and the DISCONNECT frame.
    pub async fn close(&self) {
        let task = {
            let mut runtime = lock(&self.shared.runtime);
            if runtime.is_none() && self.state() == ConnectionState::Disconnected {
                return;
            }
            log::info!("[Session] Close requested");
            self.shared.stop(runtime.take(), ConnectionState::Disconnected)
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::warn!("[Session] Driver ended abnormally: {}", e);
            }
        }
    }

    /// The authentication layer invalidated the token: stop and enter `Failed`.
    pub fn revoke_credentials(&self) {
        let mut runtime = lock(&self.shared.runtime);
        log::warn!("[Session] Credentials revoked");
        self.shared
            .record_error(SessionError::Auth("credentials revoked".to_string()));
        self.shared.stop(runtime.take(), ConnectionState::Failed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver that always holds the latest state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Every transition from now on, in order.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.transitions.subscribe()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = self.watch_state();
        if let Ok(state) = rx.wait_for(|state| predicate(state)).await {
            return state.clone();
        }
        self.state()
    }

    /// Most recent failure, cleared by `connect()`.
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        lock(&self.shared.last_error).clone()
    }

    /// Register `handler` for `topic`, replacing any previous handler.
    ///
    /// Takes effect on the current link immediately when connected and on
    /// every future link.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: impl FnMut(InboundMessage) + Send + 'static,
    ) -> SubscriptionHandle {
        self.register(topic, Handler::callback(handler))
    }

    /// Register a queue-backed handler for `topic`.
    ///
    /// Dropping the receiver unsubscribes on the next delivery.
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> (SubscriptionHandle, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (self.register(topic, Handler::Channel(tx)), rx)
    }

    /// Remove the handler for `topic`. No-op when absent.
    pub fn unsubscribe(&self, topic: &str) {
        let frame = lock(&self.shared.registry).unregister(topic);
        log::debug!("[Session] Unsubscribed {}", topic);
        if let Some((link, frame)) = frame {
            self.shared.send_frame(link, frame);
        }
    }

    /// Topics currently registered.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        lock(&self.shared.registry).topics().into_iter().collect()
    }

    /// Serialize `payload` to JSON and send it to `destination`.
    ///
    /// Fire-and-forget: frames leave in call order but delivery is not
    /// confirmed.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] unless the session is `Connected`;
    /// [`SessionError::Encode`] if `payload` does not serialize.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), SessionError> {
        if !self.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        let body =
            serde_json::to_string(payload).map_err(|e| SessionError::Encode(e.to_string()))?;
        let link = lock(&self.shared.registry)
            .link()
            .ok_or(SessionError::NotConnected)?;

        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body);

        let runtime = lock(&self.shared.runtime);
        let outbound = runtime
            .as_ref()
            .map(|runtime| &runtime.outbound)
            .ok_or(SessionError::NotConnected)?;
        outbound
            .send(OutboundFrame { link, frame })
            .map_err(|_closed| SessionError::NotConnected)?;
        log::debug!("[Session] Published to {}", destination);
        Ok(())
    }

    fn register(&self, topic: &str, handler: Handler) -> SubscriptionHandle {
        let (id, frame) = lock(&self.shared.registry).register(topic, handler);
        log::debug!("[Session] Subscribed {}", topic);
        if let Some((link, frame)) = frame {
            self.shared.send_frame(link, frame);
        }
        SubscriptionHandle {
            topic: topic.to_string(),
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }
}

/// Handle for one registration.
///
/// Dropping it does not unsubscribe.
#[derive(Debug)]
pub struct SubscriptionHandle {
    topic: String,
    id: SubscriptionId,
    shared: Weak<Shared>,
}

impl SubscriptionHandle {
    /// Topic this handle registered.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the registration, unless it has since been replaced by
    /// another `subscribe()` on the same topic.
    pub fn unsubscribe(self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let frame = lock(&shared.registry).unregister_if(&self.topic, self.id);
        if let Some((link, frame)) = frame {
            shared.send_frame(link, frame);
        }
    }
}

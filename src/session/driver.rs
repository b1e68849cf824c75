//! Background connection driver.
//!
//! One task per `connect()`. Loops handshake → message loop → backoff until
//! cancelled or until authentication fails.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ConnectionState, Liveness, Shared};
use crate::dispatch::{Dispatcher, OutboundFrame};
use crate::error::SessionError;
use crate::lock;
use crate::registry::LinkId;
use crate::stomp::{self, Command, Frame, HeartBeat, HEARTBEAT_EOL};
use crate::ws::{self, Inbound, SocketError, SocketReader, SocketWriter};

/// Lowercase fragments that mark a handshake ERROR frame as an auth rejection.
const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication",
    "forbidden",
    "invalid token",
    "expired",
    "401",
    "403",
];

/// First-outcome channel back to `connect()`.
type FirstOutcome = Option<oneshot::Sender<Result<(), SessionError>>>;

/// A link that completed the STOMP handshake.
struct Established {
    writer: SocketWriter,
    reader: SocketReader,
    heartbeat: HeartBeat,
}

/// Why a message loop ended.
enum LinkExit {
    Cancelled,
    Lost(SessionError),
}

/// Driver entry point.
pub(super) async fn run(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    first: oneshot::Sender<Result<(), SessionError>>,
) {
    let mut first: FirstOutcome = Some(first);
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        shared.transition(&cancel, ConnectionState::Connecting);

        // Token is re-read on every attempt; the auth layer may have refreshed it.
        let Some(token) = shared.credentials.token() else {
            let error = SessionError::Auth("no token available".to_string());
            fail(&shared, &cancel, &mut first, error);
            break;
        };

        let handshake = tokio::select! {
            () = cancel.cancelled() => break,
            result = handshake(&shared, &token) => result,
        };

        match handshake {
            Ok(established) => {
                attempt = 0;
                match run_link(&shared, &cancel, established, &mut outbound_rx, &outbound_tx, &mut first)
                    .await
                {
                    LinkExit::Cancelled => break,
                    LinkExit::Lost(error) => {
                        log::warn!("[Session] Link lost: {}", error);
                        shared.record_error(error);
                    }
                }
            }
            Err(error) if !error.is_retryable() => {
                fail(&shared, &cancel, &mut first, error);
                break;
            }
            Err(error) => {
                log::warn!("[Session] Connection attempt failed: {}", error);
                shared.record_error(error);
                report(&mut first, Ok(()));
            }
        }

        attempt = attempt.saturating_add(1);
        let retry_in = shared.config.backoff.delay(attempt);
        let state = ConnectionState::Reconnecting { attempt, retry_in };
        if !shared.transition(&cancel, state) && cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(retry_in) => {}
        }
    }

    log::debug!("[Session] Driver stopped");
}

/// Record a fatal failure and enter `Failed`.
fn fail(shared: &Shared, cancel: &CancellationToken, first: &mut FirstOutcome, error: SessionError) {
    log::error!("[Session] {}", error);
    shared.record_error(error.clone());
    shared.transition(cancel, ConnectionState::Failed);
    report(first, Err(error));
}

fn report(first: &mut FirstOutcome, outcome: Result<(), SessionError>) {
    if let Some(tx) = first.take() {
        let _ = tx.send(outcome);
    }
}

/// Open the WebSocket and complete the STOMP handshake within the timeout.
async fn handshake(shared: &Shared, token: &str) -> Result<Established, SessionError> {
    let config = &shared.config;
    let attempt = async {
        log::info!("[Session] Connecting to {}", config.endpoint);

        let (mut writer, mut reader) = ws::open(&config.endpoint, token)
            .await
            .map_err(socket_error)?;

        let connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", config.virtual_host())
            .header("heart-beat", config.heartbeat.to_header())
            .header("Authorization", format!("Bearer {token}"));
        writer
            .send(connect.encode())
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;

        let server = wait_for_connected(&mut reader).await?;
        let heartbeat = config.heartbeat.negotiate(server);
        log::info!(
            "[Session] CONNECTED (heart-beat out={}ms in={}ms)",
            heartbeat.outgoing.as_millis(),
            heartbeat.incoming.as_millis()
        );
        Ok::<_, SessionError>(Established {
            writer,
            reader,
            heartbeat,
        })
    };

    tokio::time::timeout(config.handshake_timeout, attempt)
        .await
        .map_err(|_elapsed| {
            SessionError::Handshake(format!(
                "no CONNECTED within {}s",
                config.handshake_timeout.as_secs_f32()
            ))
        })?
}

/// Read until CONNECTED (returning the server's heart-beat) or ERROR.
async fn wait_for_connected(reader: &mut SocketReader) -> Result<HeartBeat, SessionError> {
    loop {
        match reader.recv().await {
            Some(Ok(Inbound::Text(text))) => {
                let frames = stomp::decode(&text)
                    .map_err(|e| SessionError::Handshake(format!("bad frame during handshake: {e}")))?;
                for frame in frames {
                    match frame.command {
                        Command::Connected => {
                            let server = match frame.get("heart-beat") {
                                Some(value) => HeartBeat::parse(value).unwrap_or_else(|e| {
                                    log::warn!("[Session] Ignoring server heart-beat: {}", e);
                                    HeartBeat::DISABLED
                                }),
                                None => HeartBeat::DISABLED,
                            };
                            return Ok(server);
                        }
                        Command::Error => return Err(classify_error_frame(&frame)),
                        other => log::debug!("[Session] Ignoring {} during handshake", other),
                    }
                }
            }
            Some(Ok(Inbound::Closed { code, reason })) => {
                return Err(SessionError::Handshake(format!(
                    "closed during handshake: {code} {reason}"
                )));
            }
            Some(Ok(Inbound::Activity)) => {}
            Some(Err(e)) => return Err(SessionError::Handshake(e.to_string())),
            None => {
                return Err(SessionError::Handshake(
                    "stream ended during handshake".to_string(),
                ))
            }
        }
    }
}

/// Fatal for unusable credentials or endpoint, retryable otherwise.
fn socket_error(error: SocketError) -> SessionError {
    match error {
        SocketError::InvalidEndpoint(_) => SessionError::Endpoint(error.to_string()),
        _ if error.is_auth_rejection() => SessionError::Auth(error.to_string()),
        _ => SessionError::Handshake(error.to_string()),
    }
}

/// Auth rejection or a retryable handshake failure, judged by the ERROR text.
fn classify_error_frame(frame: &Frame) -> SessionError {
    let message = frame.get("message").unwrap_or_default();
    let text = format!("{message} {}", frame.body).to_lowercase();
    let summary = if message.is_empty() {
        frame.body.trim().to_string()
    } else {
        message.to_string()
    };
    if AUTH_MARKERS.iter().any(|marker| text.contains(marker)) {
        SessionError::Auth(summary)
    } else {
        SessionError::Handshake(format!("server error: {summary}"))
    }
}

/// Replay subscriptions, report `Connected`, then pump the link until it
/// drops or the driver is cancelled.
async fn run_link(
    shared: &Shared,
    cancel: &CancellationToken,
    established: Established,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    outbound_tx: &mpsc::UnboundedSender<OutboundFrame>,
    first: &mut FirstOutcome,
) -> LinkExit {
    let Established {
        mut writer,
        mut reader,
        heartbeat,
    } = established;
    let link = LinkId(shared.next_link.fetch_add(1, Ordering::Relaxed) + 1);

    let replay = {
        let mut registry = lock(&shared.registry);
        if cancel.is_cancelled() {
            return LinkExit::Cancelled;
        }
        registry.attach(link)
    };
    log::info!("[Session] Replaying {} subscription(s)", replay.len());
    for frame in &replay {
        if let Err(e) = writer.send(frame.encode()).await {
            release(shared, link);
            return LinkExit::Lost(SessionError::Transport(e.to_string()));
        }
    }

    if !shared.transition(cancel, ConnectionState::Connected) && cancel.is_cancelled() {
        release(shared, link);
        let _ = writer.close().await;
        return LinkExit::Cancelled;
    }
    report(first, Ok(()));

    let dispatcher = Dispatcher::new(Arc::clone(&shared.registry), Arc::clone(&shared.diagnostics))
        .with_outbound(outbound_tx.clone());
    let exit = message_loop(
        shared,
        cancel,
        link,
        heartbeat,
        &dispatcher,
        &mut writer,
        &mut reader,
        outbound_rx,
    )
    .await;

    release(shared, link);
    exit
}

/// Detach the registry if `link` is still the attached one.
fn release(shared: &Shared, link: LinkId) {
    let mut registry = lock(&shared.registry);
    if registry.link() == Some(link) {
        registry.detach();
    }
}

/// `tokio::time::interval` that tolerates a zero period (never used then).
fn ticker(period: std::time::Duration) -> tokio::time::Interval {
    let period = if period.is_zero() {
        std::time::Duration::from_secs(3600)
    } else {
        period
    };
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[allow(clippy::too_many_arguments, reason = "driver-internal plumbing")]
async fn message_loop(
    shared: &Shared,
    cancel: &CancellationToken,
    link: LinkId,
    heartbeat: HeartBeat,
    dispatcher: &Dispatcher,
    writer: &mut SocketWriter,
    reader: &mut SocketReader,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
) -> LinkExit {
    let mut liveness = Liveness::new(
        heartbeat.incoming,
        shared.config.missed_heartbeats,
        Instant::now(),
    );
    let sending = !heartbeat.outgoing.is_zero();
    let mut send_tick = ticker(heartbeat.outgoing);
    let mut check_tick = ticker(heartbeat.incoming);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                flush_pending(link, writer, outbound_rx).await;
                let _ = writer.send(Frame::new(Command::Disconnect).encode()).await;
                let _ = writer.close().await;
                return LinkExit::Cancelled;
            }

            msg = reader.recv() => match msg {
                Some(Ok(Inbound::Text(text))) => {
                    liveness.saw_traffic(Instant::now());
                    let control = dispatcher.dispatch_raw(&text);
                    if let Some(error) = control.iter().find_map(control_error) {
                        return LinkExit::Lost(error);
                    }
                }
                Some(Ok(Inbound::Activity)) => liveness.saw_traffic(Instant::now()),
                Some(Ok(Inbound::Closed { code, reason })) => {
                    return LinkExit::Lost(SessionError::Transport(format!(
                        "closed by server: {code} {reason}"
                    )));
                }
                Some(Err(e)) => return LinkExit::Lost(SessionError::Transport(e.to_string())),
                None => {
                    return LinkExit::Lost(SessionError::Transport("stream ended".to_string()));
                }
            },

            Some(outbound) = outbound_rx.recv() => {
                if outbound.link != link {
                    log::debug!(
                        "[Session] Dropping {} for stale link {}",
                        outbound.frame.command,
                        outbound.link.0
                    );
                    continue;
                }
                if let Err(e) = writer.send(outbound.frame.encode()).await {
                    return LinkExit::Lost(SessionError::Transport(e.to_string()));
                }
            }

            _ = send_tick.tick(), if sending => {
                if let Err(e) = writer.send(HEARTBEAT_EOL).await {
                    return LinkExit::Lost(SessionError::Transport(e.to_string()));
                }
            }

            _ = check_tick.tick(), if liveness.enabled() => {
                let now = Instant::now();
                if liveness.is_dead(now) {
                    return LinkExit::Lost(SessionError::Transport(format!(
                        "no traffic for {} heart-beat intervals",
                        liveness.missed(now)
                    )));
                }
            }
        }
    }
}

/// Write frames published before cancellation so a SEND right before
/// `disconnect()` still reaches the server.
async fn flush_pending(
    link: LinkId,
    writer: &mut SocketWriter,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while let Ok(outbound) = outbound_rx.try_recv() {
        if outbound.link != link {
            continue;
        }
        if let Err(e) = writer.send(outbound.frame.encode()).await {
            log::debug!("[Session] Flush stopped: {}", e);
            return;
        }
    }
}

/// Non-MESSAGE frames after the handshake: ERROR drops the link.
fn control_error(frame: &Frame) -> Option<SessionError> {
    match frame.command {
        Command::Error => {
            let message = frame.get("message").unwrap_or("ERROR frame");
            Some(SessionError::Transport(format!("server error: {message}")))
        }
        Command::Receipt => {
            log::trace!("[Session] RECEIPT {}", frame.get("receipt-id").unwrap_or("?"));
            None
        }
        other => {
            log::debug!("[Session] Unexpected {} after handshake", other);
            None
        }
    }
}

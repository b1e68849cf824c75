//! In-process STOMP-over-WebSocket server shared by the integration tests.
//!
//! Speaks just enough STOMP to drive the handshake, replay, publish,
//! heart-beat and reconnect paths end to end.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use snet_realtime::session::Backoff;
use snet_realtime::stomp::{self, Command, Frame, HeartBeat};
use snet_realtime::SessionConfig;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// How the mock server answers the next connection.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// CONNECTED with the given `heart-beat` header.
    Accept { heartbeat: &'static str },
    /// ERROR with the given `message` header, then close.
    StompError(&'static str),
    /// Reject the WebSocket upgrade with an HTTP status.
    RejectUpgrade(u16),
    /// Upgrade, then never answer CONNECT.
    Silent,
}

/// Commands the test sends to one live server connection.
#[derive(Debug)]
pub enum ServerCmd {
    Send(Frame),
    Close,
}

pub struct MockServer {
    addr: std::net::SocketAddr,
    behavior: Arc<Mutex<Behavior>>,
    accepted: Arc<AtomicUsize>,
    frames: mpsc::UnboundedReceiver<Frame>,
    connections: mpsc::UnboundedReceiver<mpsc::UnboundedSender<ServerCmd>>,
}

impl MockServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let behavior = Arc::new(Mutex::new(behavior));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        let shared_behavior = Arc::clone(&behavior);
        let shared_accepted = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared_accepted.fetch_add(1, Ordering::SeqCst);
                let behavior = shared_behavior.lock().unwrap().clone();
                tokio::spawn(serve(stream, behavior, frames_tx.clone(), conn_tx.clone()));
            }
        });

        Self {
            addr,
            behavior,
            accepted,
            frames,
            connections,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws/websocket", self.addr)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next client frame with the given command, skipping others.
    pub async fn expect(&mut self, command: Command) -> Frame {
        tokio::time::timeout(WAIT, async {
            loop {
                let frame = self.frames.recv().await.expect("server stopped");
                if frame.command == command {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {command} frame within {WAIT:?}"))
    }

    pub async fn next_connection(&mut self) -> mpsc::UnboundedSender<ServerCmd> {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection in time")
            .expect("server stopped")
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    behavior: Behavior,
    frames: mpsc::UnboundedSender<Frame>,
    connections: mpsc::UnboundedSender<mpsc::UnboundedSender<ServerCmd>>,
) {
    let reject = match behavior {
        Behavior::RejectUpgrade(status) => Some(status),
        _ => None,
    };
    let callback = move |_req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        if let Some(status) = reject {
            let mut error = ErrorResponse::new(Some("rejected".to_string()));
            *error.status_mut() = StatusCode::from_u16(status).unwrap();
            return Err(error);
        }
        resp.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("v12.stomp"),
        );
        Ok(resp)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let _ = connections.send(cmd_tx);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    for frame in stomp::decode(&text).unwrap_or_default() {
                        let is_connect = frame.command == Command::Connect;
                        let _ = frames.send(frame);
                        if !is_connect {
                            continue;
                        }
                        match &behavior {
                            Behavior::Accept { heartbeat } => {
                                let connected = Frame::new(Command::Connected)
                                    .header("version", "1.2")
                                    .header("heart-beat", *heartbeat);
                                let _ = sink.send(Message::Text(connected.encode())).await;
                            }
                            Behavior::StompError(message) => {
                                let error = Frame::new(Command::Error).header("message", *message);
                                let _ = sink.send(Message::Text(error.encode())).await;
                                let _ = sink.close().await;
                                return;
                            }
                            Behavior::Silent | Behavior::RejectUpgrade(_) => {}
                        }
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ServerCmd::Send(frame)) => {
                    let _ = sink.send(Message::Text(frame.encode())).await;
                }
                Some(ServerCmd::Close) | None => {
                    let _ = sink.close().await;
                    return;
                }
            },
        }
    }
}

/// Session tunables for fast tests: no heart-beats, 50ms fixed backoff.
pub fn config(server: &MockServer) -> SessionConfig {
    let mut config = SessionConfig::new(server.endpoint());
    config.heartbeat = HeartBeat::DISABLED;
    config.handshake_timeout = Duration::from_secs(2);
    config.backoff = Backoff::fixed(Duration::from_millis(50));
    config
}

//! WebSocket leg of the STOMP link.
//!
//! [`open`] performs the HTTP upgrade with the bearer token and the STOMP
//! sub-protocol offer and hands back split halves the session driver polls in
//! its `tokio::select!` loop. Nothing else in the crate touches
//! `tokio-tungstenite`.
//!
//! Pings are answered by tungstenite while the reader is polled, so the
//! driver only sees them as [`Inbound::Activity`].

// Rust guideline compliant 2026-02

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Sub-protocols offered during the upgrade, most preferred first.
pub const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

/// Close code reported when the peer closed without one.
const NO_STATUS: u16 = 1005;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Socket-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The endpoint is not a usable `ws`/`wss` URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The token cannot be carried in an HTTP header.
    #[error("token is not a valid header value: {0}")]
    InvalidToken(String),
    /// The server answered the upgrade with a non-101 status.
    #[error("upgrade rejected with HTTP {0}")]
    Rejected(u16),
    /// Connect, read or write failed.
    #[error("websocket: {0}")]
    Io(String),
}

impl SocketError {
    /// The credentials are unusable: refused by the server at the HTTP
    /// layer, or not sendable at all.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Rejected(401 | 403) | Self::InvalidToken(_))
    }
}

impl From<tungstenite::Error> for SocketError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected(response.status().as_u16()),
            tungstenite::Error::Url(e) => Self::InvalidEndpoint(e.to_string()),
            other => Self::Io(other.to_string()),
        }
    }
}

/// What the reader produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text message: STOMP frames and/or heart-beat EOLs.
    Text(String),
    /// Ping, pong or binary traffic. Only proves the peer is alive.
    Activity,
    /// The peer closed the socket.
    Closed {
        /// WebSocket close code (1005 when the peer sent none).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Write half.
#[derive(Debug)]
pub struct SocketWriter {
    sink: SplitSink<Socket, Message>,
}

impl SocketWriter {
    /// Send one text message (an encoded frame or a heart-beat).
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), SocketError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<(), SocketError> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half.
#[derive(Debug)]
pub struct SocketReader {
    stream: SplitStream<Socket>,
}

impl SocketReader {
    /// Next inbound event; `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<Result<Inbound, SocketError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            let inbound = match message {
                Message::Text(text) => Inbound::Text(text),
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => Inbound::Activity,
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((NO_STATUS, String::new()), |frame| {
                        (u16::from(frame.code), frame.reason.into_owned())
                    });
                    Inbound::Closed { code, reason }
                }
                Message::Frame(_) => continue,
            };
            return Some(Ok(inbound));
        }
    }
}

/// Open a STOMP-capable WebSocket to `endpoint`, presenting `token` as a
/// bearer `Authorization` header.
///
/// # Errors
///
/// [`SocketError::Rejected`] carries the HTTP status when the server refused
/// the upgrade; check [`SocketError::is_auth_rejection`].
pub async fn open(endpoint: &str, token: &str) -> Result<(SocketWriter, SocketReader), SocketError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| SocketError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| SocketError::InvalidToken(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(STOMP_SUBPROTOCOLS),
    );

    let (socket, response) = tokio_tungstenite::connect_async(request).await?;
    log::debug!(
        "[Socket] Upgraded (sub-protocol {:?})",
        response.headers().get(SEC_WEBSOCKET_PROTOCOL)
    );

    let (sink, stream) = socket.split();
    Ok((SocketWriter { sink }, SocketReader { stream }))
}

/// WebSocket URL for `path` on `server_url`; `http(s)` becomes `ws(s)`.
#[must_use]
pub fn endpoint_url(server_url: &str, path: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(host) = base.strip_prefix("https://") {
        format!("wss://{host}")
    } else if let Some(host) = base.strip_prefix("http://") {
        format!("ws://{host}")
    } else {
        base.to_string()
    };
    format!("{base}/{}", path.trim_start_matches('/'))
}

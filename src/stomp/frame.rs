//! STOMP frame encoding and decoding.

use crate::error::DecodeError;

/// A heart-beat is a single end-of-line with no frame around it.
pub const HEARTBEAT_EOL: &str = "\n";

/// STOMP commands used by the client and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Server handshake acknowledgment.
    Connected,
    /// Client publish.
    Send,
    /// Client binds a destination.
    Subscribe,
    /// Client releases a binding.
    Unsubscribe,
    /// Client graceful goodbye.
    Disconnect,
    /// Server delivery on a binding.
    Message,
    /// Server receipt for a client frame.
    Receipt,
    /// Server error; the server closes the link afterwards.
    Error,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
///
/// Headers keep wire order; when a header repeats, the first occurrence wins
/// on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Frame body (UTF-8, possibly empty).
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header `name`, or a [`DecodeError::MissingHeader`].
    pub fn require(&self, name: &'static str) -> Result<&str, DecodeError> {
        self.get(name).ok_or(DecodeError::MissingHeader(name))
    }

    /// Serialize to wire text, NUL-terminated.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in one WebSocket text message.
///
/// Leading end-of-lines are heart-beats and are skipped, so a message that is
/// only a heart-beat decodes to an empty list. Fails on the first bad frame;
/// use [`decode_each`] to keep the good ones.
pub fn decode(text: &str) -> Result<Vec<Frame>, DecodeError> {
    decode_each(text).into_iter().collect()
}

/// Decode frame by frame, resynchronising after a bad frame.
///
/// A frame that fails to decode yields one `Err` and decoding resumes after
/// the next NUL. Frames before and after it are unaffected.
pub fn decode_each(text: &str) -> Vec<Result<Frame, DecodeError>> {
    let mut frames = Vec::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return frames;
        }
        match decode_one(rest) {
            Ok((frame, remaining)) => {
                frames.push(Ok(frame));
                rest = remaining;
            }
            Err(e) => {
                frames.push(Err(e));
                match rest.find('\0') {
                    Some(nul) => rest = &rest[nul + 1..],
                    None => return frames,
                }
            }
        }
    }
}

fn decode_one(text: &str) -> Result<(Frame, &str), DecodeError> {
    let (head, after_head) = split_head(text)?;
    let mut lines = head.lines();

    let command_line = lines.next().unwrap_or_default();
    let command = Command::parse(command_line.trim_end_matches('\r'))
        .ok_or_else(|| DecodeError::Frame(format!("unknown command `{command_line}`")))?;

    let unescape = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| DecodeError::Frame(format!("malformed header line `{line}`")))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| DecodeError::Frame(format!("bad content-length `{v}`")))
        })
        .transpose()?;

    let (body, remaining) = match content_length {
        Some(len) => {
            let body = after_head
                .get(..len)
                .ok_or_else(|| DecodeError::Frame("body shorter than content-length".into()))?;
            let tail = &after_head[len..];
            let tail = tail
                .strip_prefix('\0')
                .ok_or_else(|| DecodeError::Frame("missing NUL after body".into()))?;
            (body, tail)
        }
        None => {
            let end = after_head
                .find('\0')
                .ok_or_else(|| DecodeError::Frame("unterminated frame".into()))?;
            (&after_head[..end], &after_head[end + 1..])
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        remaining,
    ))
}

/// Split at the blank line that ends the header block.
fn split_head(text: &str) -> Result<(&str, &str), DecodeError> {
    let lf = text.find("\n\n").map(|idx| (idx, 2));
    let crlf = text.find("\r\n\r\n").map(|idx| (idx, 4));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return Err(DecodeError::Frame("missing header terminator".into())),
    };
    Ok((&text[..idx], &text[idx + sep..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(DecodeError::Frame(format!(
                    "undefined escape `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

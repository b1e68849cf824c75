//! STOMP heart-beat negotiation.
//!
//! The client advertises `heart-beat:cx,cy` in CONNECT (it can send every
//! `cx` ms, it wants to receive every `cy` ms) and the server answers
//! `heart-beat:sx,sy` in CONNECTED. Zero means "not at all".

use std::time::Duration;

use crate::error::DecodeError;

/// A pair of heart-beat intervals. Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// How often this side sends.
    pub outgoing: Duration,
    /// How often this side expects to receive.
    pub incoming: Duration,
}

impl HeartBeat {
    /// Heart-beats disabled both ways.
    pub const DISABLED: Self = Self {
        outgoing: Duration::ZERO,
        incoming: Duration::ZERO,
    };

    /// Build from two intervals.
    #[must_use]
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Header value, e.g. `4000,4000`.
    #[must_use]
    pub fn to_header(self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    /// Parse a `heart-beat` header value.
    pub fn parse(value: &str) -> Result<Self, DecodeError> {
        let (out, inc) = value
            .split_once(',')
            .ok_or_else(|| DecodeError::Frame(format!("bad heart-beat `{value}`")))?;
        let parse_ms = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| DecodeError::Frame(format!("bad heart-beat `{value}`")))
        };
        Ok(Self {
            outgoing: parse_ms(out)?,
            incoming: parse_ms(inc)?,
        })
    }

    /// Effective intervals for the client given the server's answer.
    ///
    /// Outgoing is `max(cx, sy)` and incoming is `max(cy, sx)`, each disabled
    /// when either side offers zero.
    #[must_use]
    pub fn negotiate(self, server: Self) -> Self {
        let pick = |ours: Duration, theirs: Duration| {
            if ours.is_zero() || theirs.is_zero() {
                Duration::ZERO
            } else {
                ours.max(theirs)
            }
        };
        Self {
            outgoing: pick(self.outgoing, server.incoming),
            incoming: pick(self.incoming, server.outgoing),
        }
    }
}

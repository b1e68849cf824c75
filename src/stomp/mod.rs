//! STOMP framing for the messaging endpoint.
//!
//! The server speaks STOMP over WebSocket: every WebSocket text message
//! carries zero or more frames, and a bare end-of-line is a heart-beat.
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body^@
//! ```
//!
//! - [`frame`] - [`Frame`] codec (encode, decode, header escaping)
//! - [`heartbeat`] - heart-beat header parsing and negotiation

// Rust guideline compliant 2026-02

pub mod frame;
pub mod heartbeat;

pub use frame::{decode, decode_each, Command, Frame, HEARTBEAT_EOL};
pub use heartbeat::HeartBeat;

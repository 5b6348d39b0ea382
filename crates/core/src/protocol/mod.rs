//! Wire protocol: message model, text codec, and framed channel.
//!
//! The control protocol is a small, fixed RTSP-flavoured vocabulary over a
//! line-oriented CRLF text framing:
//!
//! ```text
//! SETUP rtsp://localhost/music/take1.wav RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: TCP;unicast;client_port=8000\r\n
//! \r\n
//! ```
//!
//! Responses carry the version marker first:
//!
//! ```text
//! RTSP/1.0 200 OK\r\n
//! CSeq: 1\r\n
//! Session: 583201\r\n
//! Transport: TCP;unicast;client_port=8000;server_port=41523\r\n
//! \r\n
//! ```
//!
//! ## Message vocabulary
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | CAPABILITIES | request | Supported-method discovery |
//! | DESCRIBE | request | Retrieve the media description |
//! | SETUP | request | Negotiate the data channel |
//! | PLAY / PAUSE | request | Start / suspend streaming |
//! | RECORD | request | Start an upload into storage |
//! | TEARDOWN | request | End the session |
//! | DATA | data channel | One audio chunk, or the END marker |
//! | RTSP/1.0 ... | response | Status-coded reply to a request |
//!
//! Header names and their per-type order are fixed; [`Message::encode`]
//! always emits the canonical order and [`Message::decode`] accepts the
//! headers by name, so a canonical message round-trips byte-for-byte.

pub mod channel;
pub mod message;
pub mod response;

pub use channel::MessageChannel;
pub use message::{DataMessage, Message, Method};
pub use response::{Response, status_text};

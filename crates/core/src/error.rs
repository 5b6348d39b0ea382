//! Error types for the wavecast library.

use std::fmt;

/// Errors that can occur across the wavecast stack.
///
/// Variants map to specific failure modes:
///
/// - **Protocol**: [`Parse`](Self::Parse) — a message that cannot be read
///   into the expected shape; [`UnknownMethod`](Self::UnknownMethod) — a
///   start-line token outside the fixed vocabulary. Both are fatal to the
///   connection they occur on, since the position in the byte stream is no
///   longer known.
/// - **Transport**: [`Io`](Self::Io), [`ConnectionClosed`](Self::ConnectionClosed).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Client**: [`UnexpectedMessage`](Self::UnexpectedMessage),
///   [`NoDataChannel`](Self::NoDataChannel).
#[derive(Debug, thiserror::Error)]
pub enum WavecastError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection while a message was expected.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Failed to parse a protocol message.
    #[error("malformed message: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Start-line token outside the fixed method vocabulary.
    #[error("unknown message type: {0}")]
    UnknownMethod(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The peer sent something other than the message kind the caller was
    /// waiting for (e.g. a request where a response was due).
    #[error("expected a response, got {0}")]
    UnexpectedMessage(String),

    /// A data-channel operation was attempted before SETUP negotiated one.
    #[error("no data channel established (SETUP required first)")]
    NoDataChannel,
}

/// Specific kind of message parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Start line did not have the expected `TYPE target RTSP/1.0` or
    /// `RTSP/1.0 code text` format.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A field required by the message type was absent.
    MissingHeader(&'static str),
    /// A numeric field (CSeq, Session, Content-Length) failed to parse.
    InvalidNumber(&'static str),
    /// A message body was not valid UTF-8 or was shorter than declared.
    InvalidBody,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::MissingHeader(name) => write!(f, "missing {name} header"),
            Self::InvalidNumber(name) => write!(f, "invalid number in {name}"),
            Self::InvalidBody => write!(f, "invalid message body"),
        }
    }
}

/// Convenience alias for `Result<T, WavecastError>`.
pub type Result<T> = std::result::Result<T, WavecastError>;

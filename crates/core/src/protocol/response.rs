use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, WavecastError};
use crate::protocol::message::{PROTOCOL_VERSION, header_value, parse_error, require_u32};

/// Reason phrase for a status code.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A status-coded reply to a control request.
///
/// Serializes to:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 92\r\n
/// \r\n
/// v=0\n...
/// ```
///
/// Built with a builder chain: [`Response::ok`] or [`Response::new`],
/// then `with_*` for the optional headers.
/// `Content-Length` is computed from the body on encode.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub reason: String,
    /// Echo of the request's CSeq; responses are correlated to requests
    /// purely by being the next message read on a half-duplex channel.
    pub cseq: u32,
    pub public: Option<String>,
    pub session_id: Option<u32>,
    pub transport: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

impl Response {
    pub fn new(code: u16, cseq: u32) -> Self {
        Response {
            code,
            reason: status_text(code).to_string(),
            cseq,
            public: None,
            session_id: None,
            transport: None,
            content_type: None,
            body: None,
        }
    }

    /// 200 OK.
    pub fn ok(cseq: u32) -> Self {
        Self::new(200, cseq)
    }

    pub fn with_public(mut self, methods: &str) -> Self {
        self.public = Some(methods.to_string());
        self
    }

    pub fn with_session(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_transport(mut self, transport: &str) -> Self {
        self.transport = Some(transport.to_string());
        self
    }

    pub fn with_content(mut self, content_type: &str, body: String) -> Self {
        self.content_type = Some(content_type.to_string());
        self.body = Some(body);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == 200
    }

    /// Serialize to the wire text. Optional headers are emitted in the
    /// fixed order Public, Session, Transport, Content-Type; the body (if
    /// any) follows a `Content-Length` line and the blank separator.
    pub fn encode(&self) -> String {
        let mut text = format!("{PROTOCOL_VERSION} {} {}\r\n", self.code, self.reason);
        text.push_str(&format!("CSeq: {}\r\n", self.cseq));
        if let Some(public) = &self.public {
            text.push_str(&format!("Public: {public}\r\n"));
        }
        if let Some(session_id) = self.session_id {
            text.push_str(&format!("Session: {session_id}\r\n"));
        }
        if let Some(transport) = &self.transport {
            text.push_str(&format!("Transport: {transport}\r\n"));
        }
        if let Some(content_type) = &self.content_type {
            text.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if let Some(body) = &self.body {
            text.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            text.push_str(body);
        } else {
            text.push_str("\r\n");
        }
        text
    }

    /// Build a response from an already-read status line and header list,
    /// consuming the declared body (if any) from the stream.
    pub(crate) fn from_wire<R: BufRead>(
        status_line: &str,
        headers: &[(String, String)],
        reader: &mut R,
    ) -> Result<Self> {
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code_text = parts
            .next()
            .ok_or_else(|| parse_error(ParseErrorKind::InvalidStartLine))?;
        let reason = parts
            .next()
            .ok_or_else(|| parse_error(ParseErrorKind::InvalidStartLine))?;
        if version != PROTOCOL_VERSION {
            return Err(parse_error(ParseErrorKind::InvalidStartLine));
        }
        let code: u16 = code_text
            .parse()
            .map_err(|_| parse_error(ParseErrorKind::InvalidNumber("status code")))?;

        let body = match header_value(headers, "Content-Length") {
            Some(value) => {
                let length: usize = value
                    .parse()
                    .map_err(|_| parse_error(ParseErrorKind::InvalidNumber("Content-Length")))?;
                let mut buf = vec![0u8; length];
                reader.read_exact(&mut buf).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        parse_error(ParseErrorKind::InvalidBody)
                    } else {
                        WavecastError::Io(e)
                    }
                })?;
                Some(String::from_utf8(buf).map_err(|_| parse_error(ParseErrorKind::InvalidBody))?)
            }
            None => None,
        };

        let session_id = match header_value(headers, "Session") {
            Some(value) => Some(
                value
                    .parse()
                    .map_err(|_| parse_error(ParseErrorKind::InvalidNumber("Session")))?,
            ),
            None => None,
        };

        Ok(Response {
            code,
            reason: reason.to_string(),
            cseq: require_u32(headers, "CSeq")?,
            public: header_value(headers, "Public").map(str::to_string),
            session_id,
            transport: header_value(headers, "Transport").map(str::to_string),
            content_type: header_value(headers, "Content-Type").map(str::to_string),
            body,
        })
    }
}

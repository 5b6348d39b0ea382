use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, WavecastError};
use crate::protocol::response::Response;

/// Version marker carried on every start line.
pub const PROTOCOL_VERSION: &str = "RTSP/1.0";

/// Target slot value for an ordinary audio chunk.
pub const DATA_MARKER: &str = "DATA";

/// Reserved target slot value signalling end-of-stream. The receiving side
/// ends its read loop on this marker, never on channel closure.
pub const END_MARKER: &str = "END";

/// The fixed control-method vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Capabilities,
    Describe,
    Setup,
    Play,
    Pause,
    Record,
    Teardown,
}

impl Method {
    /// The on-wire start-line token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capabilities => "CAPABILITIES",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Record => "RECORD",
            Self::Teardown => "TEARDOWN",
        }
    }

    /// Reverse of [`as_str`](Self::as_str). `None` for tokens outside the
    /// vocabulary (including `DATA`, which is not a control method).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "CAPABILITIES" => Some(Self::Capabilities),
            "DESCRIBE" => Some(Self::Describe),
            "SETUP" => Some(Self::Setup),
            "PLAY" => Some(Self::Play),
            "PAUSE" => Some(Self::Pause),
            "RECORD" => Some(Self::Record),
            "TEARDOWN" => Some(Self::Teardown),
            _ => None,
        }
    }
}

/// One chunk-of-audio message on the data channel, or the terminal marker.
///
/// The start line reuses the target slot for the marker and the CSeq slot
/// for the chunk index:
///
/// ```text
/// DATA DATA RTSP/1.0\r\n
/// CSeq: 17\r\n
/// Session: 583201\r\n
/// Payload: UklGRiQ...\r\n
/// \r\n
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// [`DATA_MARKER`] for a chunk, [`END_MARKER`] for end-of-stream.
    pub marker: String,
    /// Ascending per-stream chunk index (carried in the CSeq slot).
    pub chunk_index: u32,
    /// Session the chunk belongs to; mismatching chunks are ignored.
    pub session_id: u32,
    /// Base64-encoded frame bytes; empty on the terminal marker.
    pub payload: String,
}

impl DataMessage {
    /// An ordinary chunk carrying a base64-encoded frame.
    pub fn chunk(chunk_index: u32, session_id: u32, payload: String) -> Self {
        DataMessage {
            marker: DATA_MARKER.to_string(),
            chunk_index,
            session_id,
            payload,
        }
    }

    /// The terminal marker. `chunk_index` is the index one past the last
    /// chunk sent (i.e. the total chunk count).
    pub fn end(chunk_index: u32, session_id: u32) -> Self {
        DataMessage {
            marker: END_MARKER.to_string(),
            chunk_index,
            session_id,
            payload: String::new(),
        }
    }

    /// Whether this message is the terminal end-of-stream marker.
    pub fn is_end(&self) -> bool {
        self.marker == END_MARKER
    }
}

/// A typed protocol message: one variant per start-line type, each carrying
/// exactly the fields its type puts on the wire.
///
/// Header presence is explicit in the variant shape (an `Option` field is an
/// optional header line), so decoding reads all headers up to the blank line
/// first and then validates the required set — reordered headers parse fine,
/// while a missing required header is a [`WavecastError::Parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Capabilities {
        target: String,
        cseq: u32,
    },
    Describe {
        target: String,
        cseq: u32,
        accept: String,
    },
    Setup {
        target: String,
        cseq: u32,
        transport: String,
    },
    Play {
        target: String,
        cseq: u32,
        session_id: u32,
        range: Option<String>,
    },
    Pause {
        target: String,
        cseq: u32,
        session_id: u32,
        range: Option<String>,
    },
    Record {
        target: String,
        cseq: u32,
        session_id: u32,
        range: Option<String>,
    },
    Teardown {
        target: String,
        cseq: u32,
        session_id: u32,
    },
    Data(DataMessage),
    Response(Response),
}

impl Message {
    pub fn capabilities(target: &str, cseq: u32) -> Self {
        Message::Capabilities {
            target: target.to_string(),
            cseq,
        }
    }

    pub fn describe(target: &str, cseq: u32, accept: &str) -> Self {
        Message::Describe {
            target: target.to_string(),
            cseq,
            accept: accept.to_string(),
        }
    }

    pub fn setup(target: &str, cseq: u32, transport: &str) -> Self {
        Message::Setup {
            target: target.to_string(),
            cseq,
            transport: transport.to_string(),
        }
    }

    pub fn play(target: &str, cseq: u32, session_id: u32, range: Option<&str>) -> Self {
        Message::Play {
            target: target.to_string(),
            cseq,
            session_id,
            range: range.map(str::to_string),
        }
    }

    pub fn pause(target: &str, cseq: u32, session_id: u32) -> Self {
        Message::Pause {
            target: target.to_string(),
            cseq,
            session_id,
            range: None,
        }
    }

    pub fn record(target: &str, cseq: u32, session_id: u32, range: Option<&str>) -> Self {
        Message::Record {
            target: target.to_string(),
            cseq,
            session_id,
            range: range.map(str::to_string),
        }
    }

    pub fn teardown(target: &str, cseq: u32, session_id: u32) -> Self {
        Message::Teardown {
            target: target.to_string(),
            cseq,
            session_id,
        }
    }

    /// Start-line type token, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Capabilities { .. } => "CAPABILITIES",
            Message::Describe { .. } => "DESCRIBE",
            Message::Setup { .. } => "SETUP",
            Message::Play { .. } => "PLAY",
            Message::Pause { .. } => "PAUSE",
            Message::Record { .. } => "RECORD",
            Message::Teardown { .. } => "TEARDOWN",
            Message::Data(_) => "DATA",
            Message::Response(_) => "RESPONSE",
        }
    }

    /// The control method this message invokes, if it is a request.
    pub fn method(&self) -> Option<Method> {
        match self {
            Message::Capabilities { .. } => Some(Method::Capabilities),
            Message::Describe { .. } => Some(Method::Describe),
            Message::Setup { .. } => Some(Method::Setup),
            Message::Play { .. } => Some(Method::Play),
            Message::Pause { .. } => Some(Method::Pause),
            Message::Record { .. } => Some(Method::Record),
            Message::Teardown { .. } => Some(Method::Teardown),
            Message::Data(_) | Message::Response(_) => None,
        }
    }

    /// Sequence number (chunk index for DATA).
    pub fn cseq(&self) -> u32 {
        match self {
            Message::Capabilities { cseq, .. }
            | Message::Describe { cseq, .. }
            | Message::Setup { cseq, .. }
            | Message::Play { cseq, .. }
            | Message::Pause { cseq, .. }
            | Message::Record { cseq, .. }
            | Message::Teardown { cseq, .. } => *cseq,
            Message::Data(data) => data.chunk_index,
            Message::Response(response) => response.cseq,
        }
    }

    /// Session id carried by the message, if its type has one.
    pub fn session_id(&self) -> Option<u32> {
        match self {
            Message::Play { session_id, .. }
            | Message::Pause { session_id, .. }
            | Message::Record { session_id, .. }
            | Message::Teardown { session_id, .. } => Some(*session_id),
            Message::Data(data) => Some(data.session_id),
            Message::Response(response) => response.session_id,
            _ => None,
        }
    }

    /// Serialize to the canonical wire text: start line, CSeq, the type's
    /// field lines in fixed order, terminating blank line, optional body.
    pub fn encode(&self) -> String {
        match self {
            Message::Capabilities { target, cseq } => {
                format!("CAPABILITIES {target} {PROTOCOL_VERSION}\r\nCSeq: {cseq}\r\n\r\n")
            }
            Message::Describe {
                target,
                cseq,
                accept,
            } => format!(
                "DESCRIBE {target} {PROTOCOL_VERSION}\r\nCSeq: {cseq}\r\nAccept: {accept}\r\n\r\n"
            ),
            Message::Setup {
                target,
                cseq,
                transport,
            } => format!(
                "SETUP {target} {PROTOCOL_VERSION}\r\nCSeq: {cseq}\r\nTransport: {transport}\r\n\r\n"
            ),
            Message::Play {
                target,
                cseq,
                session_id,
                range,
            } => encode_stream_request("PLAY", target, *cseq, *session_id, range.as_deref()),
            Message::Pause {
                target,
                cseq,
                session_id,
                range,
            } => encode_stream_request("PAUSE", target, *cseq, *session_id, range.as_deref()),
            Message::Record {
                target,
                cseq,
                session_id,
                range,
            } => encode_stream_request("RECORD", target, *cseq, *session_id, range.as_deref()),
            Message::Teardown {
                target,
                cseq,
                session_id,
            } => format!(
                "TEARDOWN {target} {PROTOCOL_VERSION}\r\nCSeq: {cseq}\r\nSession: {session_id}\r\n\r\n"
            ),
            Message::Data(data) => format!(
                "DATA {} {PROTOCOL_VERSION}\r\nCSeq: {}\r\nSession: {}\r\nPayload: {}\r\n\r\n",
                data.marker, data.chunk_index, data.session_id, data.payload
            ),
            Message::Response(response) => response.encode(),
        }
    }

    /// Read one complete message from a buffered stream.
    ///
    /// Blocks until the terminating blank line (plus the declared body, for
    /// responses with content). Fails with [`WavecastError::ConnectionClosed`]
    /// on EOF at a message boundary, [`WavecastError::Parse`] on malformed
    /// framing, and [`WavecastError::UnknownMethod`] for a start-line token
    /// outside the vocabulary.
    pub fn decode<R: BufRead>(reader: &mut R) -> Result<Message> {
        let start = read_line(reader)?;
        if start.is_empty() {
            return Err(parse_error(ParseErrorKind::EmptyMessage));
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            let line = read_line(reader)?;
            if line.is_empty() {
                break;
            }
            let colon = line
                .find(':')
                .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))?;
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        if start.starts_with(PROTOCOL_VERSION) {
            let response = Response::from_wire(&start, &headers, reader)?;
            return Ok(Message::Response(response));
        }

        let parts: Vec<&str> = start.split_whitespace().collect();
        if parts.len() != 3 || parts[2] != PROTOCOL_VERSION {
            return Err(parse_error(ParseErrorKind::InvalidStartLine));
        }
        let target = parts[1].to_string();
        let cseq = require_u32(&headers, "CSeq")?;

        if parts[0] == "DATA" {
            return Ok(Message::Data(DataMessage {
                marker: target,
                chunk_index: cseq,
                session_id: require_u32(&headers, "Session")?,
                payload: require_header(&headers, "Payload")?.to_string(),
            }));
        }

        let method = Method::from_token(parts[0])
            .ok_or_else(|| WavecastError::UnknownMethod(parts[0].to_string()))?;

        Ok(match method {
            Method::Capabilities => Message::Capabilities { target, cseq },
            Method::Describe => Message::Describe {
                target,
                cseq,
                accept: require_header(&headers, "Accept")?.to_string(),
            },
            Method::Setup => Message::Setup {
                target,
                cseq,
                transport: require_header(&headers, "Transport")?.to_string(),
            },
            Method::Play => Message::Play {
                target,
                cseq,
                session_id: require_u32(&headers, "Session")?,
                range: header_value(&headers, "Range").map(str::to_string),
            },
            Method::Pause => Message::Pause {
                target,
                cseq,
                session_id: require_u32(&headers, "Session")?,
                range: header_value(&headers, "Range").map(str::to_string),
            },
            Method::Record => Message::Record {
                target,
                cseq,
                session_id: require_u32(&headers, "Session")?,
                range: header_value(&headers, "Range").map(str::to_string),
            },
            Method::Teardown => Message::Teardown {
                target,
                cseq,
                session_id: require_u32(&headers, "Session")?,
            },
        })
    }
}

fn encode_stream_request(
    token: &str,
    target: &str,
    cseq: u32,
    session_id: u32,
    range: Option<&str>,
) -> String {
    let mut text =
        format!("{token} {target} {PROTOCOL_VERSION}\r\nCSeq: {cseq}\r\nSession: {session_id}\r\n");
    if let Some(range) = range {
        text.push_str(&format!("Range: {range}\r\n"));
    }
    text.push_str("\r\n");
    text
}

pub(crate) fn parse_error(kind: ParseErrorKind) -> WavecastError {
    WavecastError::Parse { kind }
}

/// Read one CRLF-terminated line, stripping the terminator.
/// EOF before any byte is [`WavecastError::ConnectionClosed`].
fn read_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(WavecastError::ConnectionClosed);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Case-insensitive header lookup, first match wins.
pub(crate) fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub(crate) fn require_header<'a>(
    headers: &'a [(String, String)],
    name: &'static str,
) -> Result<&'a str> {
    header_value(headers, name).ok_or_else(|| parse_error(ParseErrorKind::MissingHeader(name)))
}

pub(crate) fn require_u32(headers: &[(String, String)], name: &'static str) -> Result<u32> {
    require_header(headers, name)?
        .parse()
        .map_err(|_| parse_error(ParseErrorKind::InvalidNumber(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(wire: &str) -> Result<Message> {
        Message::decode(&mut wire.as_bytes())
    }

    #[test]
    fn decode_capabilities() {
        let msg = decode("CAPABILITIES rtsp://localhost/media RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(
            msg,
            Message::capabilities("rtsp://localhost/media", 1),
        );
        assert_eq!(msg.method(), Some(Method::Capabilities));
    }

    #[test]
    fn decode_setup_with_transport() {
        let msg = decode(
            "SETUP rtsp://localhost/music/a.wav RTSP/1.0\r\n\
             CSeq: 2\r\n\
             Transport: TCP;unicast;client_port=8000\r\n\r\n",
        )
        .unwrap();
        match msg {
            Message::Setup { transport, cseq, .. } => {
                assert_eq!(cseq, 2);
                assert_eq!(transport, "TCP;unicast;client_port=8000");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn decode_play_with_and_without_range() {
        let with = decode(
            "PLAY rtsp://localhost/music/a.wav RTSP/1.0\r\n\
             CSeq: 3\r\nSession: 123456\r\nRange: npt=0.0-\r\n\r\n",
        )
        .unwrap();
        assert_eq!(
            with,
            Message::play("rtsp://localhost/music/a.wav", 3, 123456, Some("npt=0.0-"))
        );

        let without =
            decode("PLAY rtsp://localhost/music/a.wav RTSP/1.0\r\nCSeq: 4\r\nSession: 123456\r\n\r\n")
                .unwrap();
        assert_eq!(
            without,
            Message::play("rtsp://localhost/music/a.wav", 4, 123456, None)
        );
    }

    #[test]
    fn decode_data_chunk_and_end() {
        let chunk = decode("DATA DATA RTSP/1.0\r\nCSeq: 7\r\nSession: 99\r\nPayload: AAECAw==\r\n\r\n")
            .unwrap();
        match chunk {
            Message::Data(data) => {
                assert!(!data.is_end());
                assert_eq!(data.chunk_index, 7);
                assert_eq!(data.session_id, 99);
                assert_eq!(data.payload, "AAECAw==");
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let end = decode("DATA END RTSP/1.0\r\nCSeq: 8\r\nSession: 99\r\nPayload: \r\n\r\n").unwrap();
        match end {
            Message::Data(data) => assert!(data.is_end()),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_method() {
        let err = decode("ANNOUNCE rtsp://localhost/x RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap_err();
        assert!(matches!(err, WavecastError::UnknownMethod(token) if token == "ANNOUNCE"));
    }

    #[test]
    fn decode_missing_required_header() {
        // SETUP without a Transport line
        let err = decode("SETUP rtsp://localhost/x RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap_err();
        assert!(matches!(
            err,
            WavecastError::Parse {
                kind: ParseErrorKind::MissingHeader("Transport")
            }
        ));
    }

    #[test]
    fn decode_invalid_start_line() {
        assert!(matches!(
            decode("JUSTAMETHOD\r\n\r\n").unwrap_err(),
            WavecastError::Parse {
                kind: ParseErrorKind::InvalidStartLine
            }
        ));
    }

    #[test]
    fn decode_eof_is_connection_closed() {
        assert!(matches!(
            decode("").unwrap_err(),
            WavecastError::ConnectionClosed
        ));
    }

    #[test]
    fn headers_accepted_in_any_order() {
        let msg = decode(
            "PLAY rtsp://localhost/a RTSP/1.0\r\n\
             Range: npt=0.0-\r\nSession: 5\r\nCSeq: 9\r\n\r\n",
        )
        .unwrap();
        assert_eq!(msg.cseq(), 9);
        assert_eq!(msg.session_id(), Some(5));
    }

    #[test]
    fn round_trip_is_byte_exact() {
        let wires = [
            "CAPABILITIES rtsp://localhost/media RTSP/1.0\r\nCSeq: 1\r\n\r\n".to_string(),
            "DESCRIBE rtsp://localhost/media RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"
                .to_string(),
            "SETUP rtsp://localhost/media RTSP/1.0\r\nCSeq: 3\r\nTransport: TCP;unicast\r\n\r\n"
                .to_string(),
            "PLAY rtsp://localhost/a.wav RTSP/1.0\r\nCSeq: 4\r\nSession: 111111\r\nRange: npt=0.0-\r\n\r\n"
                .to_string(),
            "PAUSE rtsp://localhost/a.wav RTSP/1.0\r\nCSeq: 5\r\nSession: 111111\r\n\r\n".to_string(),
            "RECORD rtsp://localhost/b.wav RTSP/1.0\r\nCSeq: 6\r\nSession: 111111\r\n\r\n".to_string(),
            "TEARDOWN rtsp://localhost/a.wav RTSP/1.0\r\nCSeq: 7\r\nSession: 111111\r\n\r\n"
                .to_string(),
            "DATA DATA RTSP/1.0\r\nCSeq: 0\r\nSession: 111111\r\nPayload: AAECAw==\r\n\r\n"
                .to_string(),
            "DATA END RTSP/1.0\r\nCSeq: 12\r\nSession: 111111\r\nPayload: \r\n\r\n".to_string(),
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: DESCRIBE, SETUP, PLAY\r\n\r\n".to_string(),
            "RTSP/1.0 455 Method Not Valid in This State\r\nCSeq: 2\r\n\r\n".to_string(),
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Type: application/sdp\r\nContent-Length: 4\r\n\r\nv=0\n"
                .to_string(),
        ];
        for wire in wires {
            let msg = decode(&wire).unwrap();
            assert_eq!(msg.encode(), wire, "round trip changed: {}", msg.kind());
        }
    }
}

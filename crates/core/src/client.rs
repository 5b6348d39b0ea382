//! Control-channel client: issues requests, tracks the CSeq counter and
//! session id, and owns the data-channel socket established by SETUP.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;

use crate::error::{Result, WavecastError};
use crate::protocol::{Message, MessageChannel, Response};
use crate::worker::{ReceiverHandle, SenderHandle};

pub struct Client {
    channel: MessageChannel,
    cseq: u32,
    session_id: Option<u32>,
    data_stream: Option<TcpStream>,
}

impl Client {
    /// Dial the server's control port.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let channel = MessageChannel::connect(addr)?;
        tracing::info!(server = %channel.peer_addr(), "control channel connected");
        Ok(Client {
            channel,
            cseq: 0,
            session_id: None,
            data_stream: None,
        })
    }

    /// The session id from the last successful SETUP, if any.
    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// Requests sent before SETUP carry session id 0; the server answers
    /// them with 454.
    fn claimed_id(&self) -> u32 {
        self.session_id.unwrap_or(0)
    }

    /// Send one request and block for its response. Anything but a
    /// response message on the control channel is a protocol violation.
    fn request(&mut self, message: Message) -> Result<Response> {
        self.channel.send(&message)?;
        match self.channel.recv()? {
            Message::Response(response) => Ok(response),
            other => Err(WavecastError::UnexpectedMessage(other.kind().to_string())),
        }
    }

    pub fn capabilities(&mut self, target: &str) -> Result<Response> {
        let cseq = self.next_cseq();
        self.request(Message::capabilities(target, cseq))
    }

    pub fn describe(&mut self, target: &str) -> Result<Response> {
        let cseq = self.next_cseq();
        self.request(Message::describe(target, cseq, "application/sdp"))
    }

    /// Establish a session: on 200 the advertised `server_port` is dialed
    /// at the server's address and the returned session id is retained for
    /// later requests.
    pub fn setup(&mut self, target: &str) -> Result<Response> {
        let cseq = self.next_cseq();
        let response = self.request(Message::setup(target, cseq, "RTP/AVP/TCP;unicast"))?;
        if !response.is_ok() {
            return Ok(response);
        }

        let port = response
            .transport
            .as_deref()
            .and_then(server_port)
            .ok_or(WavecastError::NoDataChannel)?;
        let data_addr = (self.channel.peer_addr().ip(), port);
        let data_stream = TcpStream::connect(data_addr)?;
        tracing::info!(port, session_id = ?response.session_id, "data channel connected");

        self.session_id = response.session_id;
        self.data_stream = Some(data_stream);
        Ok(response)
    }

    pub fn play(&mut self, target: &str, range: Option<&str>) -> Result<Response> {
        let cseq = self.next_cseq();
        let claimed = self.claimed_id();
        self.request(Message::play(target, cseq, claimed, range))
    }

    pub fn pause(&mut self, target: &str) -> Result<Response> {
        let cseq = self.next_cseq();
        let claimed = self.claimed_id();
        self.request(Message::pause(target, cseq, claimed))
    }

    pub fn record(&mut self, target: &str, range: Option<&str>) -> Result<Response> {
        let cseq = self.next_cseq();
        let claimed = self.claimed_id();
        self.request(Message::record(target, cseq, claimed, range))
    }

    /// End the session. On 200 the data channel is closed and the session
    /// id forgotten; the control channel stays usable for a fresh SETUP on
    /// the server's side of a new connection.
    pub fn teardown(&mut self, target: &str) -> Result<Response> {
        let cseq = self.next_cseq();
        let claimed = self.claimed_id();
        let response = self.request(Message::teardown(target, cseq, claimed))?;
        if response.is_ok() {
            self.session_id = None;
            if let Some(stream) = self.data_stream.take() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        Ok(response)
    }

    /// Start a sender worker pushing `source` over the data channel, for
    /// use after a 200 to RECORD.
    pub fn send_audio(&mut self, source: PathBuf) -> Result<SenderHandle> {
        let stream = self.data_stream()?;
        SenderHandle::spawn(stream, source, self.claimed_id())
    }

    /// Start a receiver worker persisting the incoming stream to `output`,
    /// for use after a 200 to PLAY.
    pub fn save_stream(&mut self, output: PathBuf) -> Result<ReceiverHandle> {
        let stream = self.data_stream()?;
        ReceiverHandle::spawn(stream, self.claimed_id(), output)
    }

    fn data_stream(&self) -> Result<TcpStream> {
        let stream = self
            .data_stream
            .as_ref()
            .ok_or(WavecastError::NoDataChannel)?;
        Ok(stream.try_clone()?)
    }
}

/// Extract the `server_port` parameter from a Transport header value like
/// `RTP/AVP/TCP;unicast;server_port=40212`.
fn server_port(transport: &str) -> Option<u16> {
    transport
        .split(';')
        .find_map(|param| param.trim().strip_prefix("server_port="))
        .and_then(|value| value.parse().ok())
}

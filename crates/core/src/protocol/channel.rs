use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use crate::error::Result;
use crate::protocol::Message;

/// A framed message channel over one TCP stream.
///
/// Used for both the control connection and the data channel. Reads go
/// through a buffered clone of the stream, writes through the original, so
/// a control loop can block in [`recv`](Self::recv) while another thread
/// holds a write clone of the same socket.
///
/// [`send`](Self::send) is fire-and-forget; no acknowledgment exists at
/// this layer. [`recv`](Self::recv) blocks until a complete message has
/// been read, failing with
/// [`ConnectionClosed`](crate::WavecastError::ConnectionClosed) when the
/// peer goes away.
pub struct MessageChannel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer_addr: SocketAddr,
}

impl MessageChannel {
    /// Wrap an established stream (e.g. from `TcpListener::accept`).
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(MessageChannel {
            reader,
            writer: stream,
            peer_addr,
        })
    }

    /// Dial a peer and wrap the resulting stream.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::new(TcpStream::connect(addr)?)
    }

    pub fn send(&mut self, message: &Message) -> Result<()> {
        tracing::trace!(peer = %self.peer_addr, kind = message.kind(), cseq = message.cseq(), "send");
        self.writer.write_all(message.encode().as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Message> {
        let message = Message::decode(&mut self.reader)?;
        tracing::trace!(peer = %self.peer_addr, kind = message.kind(), cseq = message.cseq(), "recv");
        Ok(message)
    }

    /// A raw clone of the underlying stream, for handing to a worker thread.
    pub fn try_clone_stream(&self) -> std::io::Result<TcpStream> {
        self.writer.try_clone()
    }

    /// Shut both directions down, unblocking any thread parked in a read.
    pub fn shutdown(&self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

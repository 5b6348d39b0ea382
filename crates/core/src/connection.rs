//! Per-connection control loop and method dispatch.
//!
//! One [`ConnectionHandler`] owns one [`Session`] for the whole life of a
//! control connection: it blocks on the next control message, validates the
//! method against the session phase, performs the side effect (establish
//! the data channel, start or toggle a streaming worker), writes exactly
//! one response, and repeats until TEARDOWN or the connection drops. A
//! drop without TEARDOWN is an implicit teardown — resources are released
//! and no response is owed.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::RngExt;

use crate::error::{Result, WavecastError};
use crate::protocol::{Message, MessageChannel, Response};
use crate::server::ServerConfig;
use crate::session::{Session, SessionPhase};
use crate::worker::{ActiveWorker, ReceiverHandle, SenderHandle};

/// Method list advertised in the CAPABILITIES response.
pub const SUPPORTED_METHODS: &str = "DESCRIBE, SETUP, PLAY, PAUSE, RECORD, TEARDOWN";

/// Fixed media description returned by DESCRIBE: stereo 16-bit PCM at
/// 44.1 kHz.
const MEDIA_DESCRIPTION: &str = "v=0\n\
    o=- 1 1 IN IP4 127.0.0.1\n\
    s=Stereo PCM Audio\n\
    t=0 0\n\
    m=audio 0 RTP/AVP 96\n\
    a=rtpmap:96 L16/44100/2";

pub struct ConnectionHandler {
    channel: MessageChannel,
    session: Session,
    config: Arc<ServerConfig>,
    peer_addr: SocketAddr,
    /// Listener bound during SETUP; the blocking accept happens after the
    /// response is written, since the peer dials only once it has read the
    /// advertised port.
    pending_accept: Option<TcpListener>,
}

impl ConnectionHandler {
    fn new(channel: MessageChannel, config: Arc<ServerConfig>) -> Self {
        let peer_addr = channel.peer_addr();
        ConnectionHandler {
            channel,
            session: Session::new(),
            config,
            peer_addr,
            pending_accept: None,
        }
    }

    /// Entry point: run the control loop for one accepted connection.
    pub fn handle(stream: TcpStream, config: Arc<ServerConfig>, running: Arc<AtomicBool>) {
        let channel = match MessageChannel::new(stream) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(error = %e, "failed to set up control channel");
                return;
            }
        };

        let mut handler = ConnectionHandler::new(channel, config);
        let peer_addr = handler.peer_addr;
        tracing::info!(%peer_addr, "client connected");

        let reason = handler.run(&running);
        handler.release();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let message = match self.channel.recv() {
                Ok(message) => message,
                Err(WavecastError::ConnectionClosed) => return "connection closed by client",
                Err(e) => {
                    // Protocol errors leave the stream position unknown; no
                    // recovery is attempted and no response is owed.
                    tracing::warn!(peer = %self.peer_addr, error = %e, "fatal protocol error");
                    return "protocol error";
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                kind = message.kind(),
                cseq = message.cseq(),
                "request"
            );

            let response = self.dispatch(&message);

            tracing::debug!(peer = %self.peer_addr, status = response.code, "response");

            if self
                .channel
                .send(&Message::Response(response))
                .is_err()
            {
                return "write error";
            }

            if let Err(e) = self.finish_setup() {
                tracing::warn!(peer = %self.peer_addr, error = %e, "data channel accept failed");
                return "data channel accept failed";
            }

            if self.session.phase() == SessionPhase::Teardown {
                return "teardown";
            }
        }
        "server shutting down"
    }

    /// Route one control message per the method-by-phase table and produce
    /// its response. State errors answer with their status code and leave
    /// the phase unchanged.
    fn dispatch(&mut self, message: &Message) -> Response {
        let cseq = message.cseq();

        let Some(method) = message.method() else {
            tracing::warn!(peer = %self.peer_addr, kind = message.kind(), "not a control method");
            return Response::new(400, cseq);
        };

        if !self.session.phase().allows(method) {
            tracing::warn!(
                peer = %self.peer_addr,
                method = method.as_str(),
                phase = ?self.session.phase(),
                "method not valid in current phase"
            );
            return Response::new(455, cseq);
        }

        match message {
            Message::Capabilities { .. } => Response::ok(cseq).with_public(SUPPORTED_METHODS),
            Message::Describe { .. } => {
                Response::ok(cseq).with_content("application/sdp", MEDIA_DESCRIPTION.to_string())
            }
            Message::Setup { transport, .. } => self.handle_setup(cseq, transport),
            Message::Play {
                target, session_id, ..
            } => self.handle_play(cseq, target, *session_id),
            Message::Pause { session_id, .. } => self.handle_pause(cseq, *session_id),
            Message::Record {
                target, session_id, ..
            } => self.handle_record(cseq, target, *session_id),
            Message::Teardown { session_id, .. } => self.handle_teardown(cseq, *session_id),
            _ => Response::new(400, cseq),
        }
    }

    fn handle_setup(&mut self, cseq: u32, transport: &str) -> Response {
        if self.session.phase() == SessionPhase::Ready {
            // Re-SETUP: keep the assigned session id and reuse the
            // existing data channel, echoing the port already advertised.
            let (Some(session_id), Some(port)) = (self.session.id(), self.session.data_port)
            else {
                return Response::new(455, cseq);
            };
            tracing::debug!(peer = %self.peer_addr, session_id, port, "SETUP repeated, reusing data channel");
            return Response::ok(cseq)
                .with_session(session_id)
                .with_transport(&format!("{transport};server_port={port}"));
        }

        let listener = match TcpListener::bind(("0.0.0.0", 0)) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(peer = %self.peer_addr, error = %e, "failed to bind data channel port");
                return Response::new(500, cseq);
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                tracing::error!(peer = %self.peer_addr, error = %e, "failed to read data channel port");
                return Response::new(500, cseq);
            }
        };

        let session_id = rand::rng().random_range(100_000..1_000_000);
        self.session.assign_id(session_id);
        self.session.data_port = Some(port);
        self.session.set_phase(SessionPhase::Ready);
        self.pending_accept = Some(listener);

        tracing::info!(peer = %self.peer_addr, session_id, port, "session established via SETUP");

        Response::ok(cseq)
            .with_session(session_id)
            .with_transport(&format!("{transport};server_port={port}"))
    }

    /// Complete a SETUP after its response went out: block until the peer
    /// dials the advertised port, then bind the stream to the session. An
    /// accept failure is fatal to the connection.
    fn finish_setup(&mut self) -> Result<()> {
        if let Some(listener) = self.pending_accept.take() {
            let (stream, data_peer) = listener.accept()?;
            tracing::info!(peer = %self.peer_addr, %data_peer, "data channel connected");
            self.session.data_channel = Some(MessageChannel::new(stream)?);
        }
        Ok(())
    }

    fn handle_play(&mut self, cseq: u32, target: &str, claimed: u32) -> Response {
        let Some(path) = self.resolve_resource(target) else {
            tracing::warn!(peer = %self.peer_addr, target, "PLAY with unusable target");
            return Response::new(404, cseq);
        };
        if !path.is_file() {
            tracing::warn!(peer = %self.peer_addr, path = %path.display(), "PLAY resource not found");
            return Response::new(404, cseq);
        }
        if !self.session.id_matches(claimed) {
            tracing::warn!(peer = %self.peer_addr, claimed, "PLAY session id mismatch");
            return Response::new(454, cseq);
        }

        match &self.session.worker {
            Some(ActiveWorker::Sender(handle)) => {
                // A sender already exists: this PLAY resumes it from the
                // next unsent frame instead of creating a new worker.
                handle.toggle_pause();
                self.session.set_phase(SessionPhase::Playing);
                tracing::info!(peer = %self.peer_addr, session_id = claimed, "playback resumed");
                Response::ok(cseq).with_session(claimed)
            }
            Some(ActiveWorker::Receiver(_)) => {
                tracing::warn!(peer = %self.peer_addr, "PLAY while a receiver worker is active");
                Response::new(455, cseq)
            }
            None => {
                let Some(channel) = &self.session.data_channel else {
                    return Response::new(455, cseq);
                };
                let stream = match channel.try_clone_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(peer = %self.peer_addr, error = %e, "failed to clone data channel");
                        return Response::new(500, cseq);
                    }
                };
                match SenderHandle::spawn(stream, path.clone(), claimed) {
                    Ok(handle) => {
                        self.session.worker = Some(ActiveWorker::Sender(handle));
                        self.session.set_phase(SessionPhase::Playing);
                        tracing::info!(
                            peer = %self.peer_addr,
                            session_id = claimed,
                            path = %path.display(),
                            "playback started"
                        );
                        Response::ok(cseq).with_session(claimed)
                    }
                    Err(e) => {
                        tracing::error!(peer = %self.peer_addr, error = %e, "failed to start sender worker");
                        Response::new(500, cseq)
                    }
                }
            }
        }
    }

    fn handle_pause(&mut self, cseq: u32, claimed: u32) -> Response {
        if !self.session.id_matches(claimed) {
            tracing::warn!(peer = %self.peer_addr, claimed, "PAUSE session id mismatch");
            return Response::new(454, cseq);
        }
        let Some(ActiveWorker::Sender(handle)) = &self.session.worker else {
            return Response::new(455, cseq);
        };
        handle.toggle_pause();
        self.session.set_phase(SessionPhase::Ready);
        tracing::info!(peer = %self.peer_addr, session_id = claimed, "playback paused");
        Response::ok(cseq).with_session(claimed)
    }

    fn handle_record(&mut self, cseq: u32, target: &str, claimed: u32) -> Response {
        if !self.session.id_matches(claimed) {
            tracing::warn!(peer = %self.peer_addr, claimed, "RECORD session id mismatch");
            return Response::new(454, cseq);
        }
        let Some(path) = self.resolve_resource(target) else {
            tracing::warn!(peer = %self.peer_addr, target, "RECORD with unusable target");
            return Response::new(404, cseq);
        };
        if path.exists() {
            tracing::warn!(peer = %self.peer_addr, path = %path.display(), "RECORD target already exists");
            return Response::new(403, cseq);
        }
        if self.session.worker.is_some() {
            tracing::warn!(peer = %self.peer_addr, "RECORD while a worker is active");
            return Response::new(455, cseq);
        }
        let Some(channel) = &self.session.data_channel else {
            return Response::new(455, cseq);
        };
        let stream = match channel.try_clone_stream() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(peer = %self.peer_addr, error = %e, "failed to clone data channel");
                return Response::new(500, cseq);
            }
        };
        match ReceiverHandle::spawn(stream, claimed, path.clone()) {
            Ok(handle) => {
                self.session.worker = Some(ActiveWorker::Receiver(handle));
                self.session.set_phase(SessionPhase::Recording);
                tracing::info!(
                    peer = %self.peer_addr,
                    session_id = claimed,
                    path = %path.display(),
                    "recording started"
                );
                Response::ok(cseq).with_session(claimed)
            }
            Err(e) => {
                tracing::error!(peer = %self.peer_addr, error = %e, "failed to start receiver worker");
                Response::new(500, cseq)
            }
        }
    }

    fn handle_teardown(&mut self, cseq: u32, claimed: u32) -> Response {
        if !self.session.id_matches(claimed) {
            tracing::warn!(peer = %self.peer_addr, claimed, "TEARDOWN session id mismatch");
            return Response::new(454, cseq);
        }
        self.release();
        self.session.set_phase(SessionPhase::Teardown);
        tracing::info!(peer = %self.peer_addr, session_id = claimed, "session torn down");
        Response::ok(cseq)
    }

    /// Stop the active worker (if any) and close the data channel. Also
    /// runs when the connection drops without a TEARDOWN.
    fn release(&mut self) {
        if let Some(mut worker) = self.session.worker.take() {
            worker.stop();
        }
        if let Some(channel) = self.session.data_channel.take() {
            channel.shutdown();
        }
        self.pending_accept = None;
    }

    /// Map a request target like `rtsp://host/music/take1.wav` to a path
    /// under the storage root. Targets without a resource path, or ones
    /// trying to step outside the root, resolve to nothing.
    fn resolve_resource(&self, target: &str) -> Option<PathBuf> {
        let after_scheme = target.strip_prefix("rtsp://")?;
        let (_host, resource) = after_scheme.split_once('/')?;
        if resource.is_empty() {
            return None;
        }
        let relative = Path::new(resource);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.config.storage_dir.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn handler_with_storage(storage_dir: PathBuf) -> ConnectionHandler {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let config = Arc::new(ServerConfig {
            storage_dir,
            ..ServerConfig::default()
        });
        ConnectionHandler::new(MessageChannel::new(stream).unwrap(), config)
    }

    fn handler() -> ConnectionHandler {
        handler_with_storage(std::env::temp_dir())
    }

    #[test]
    fn play_in_init_is_455_and_phase_unchanged() {
        let mut handler = handler();
        let response = handler.dispatch(&Message::play("rtsp://localhost/a.wav", 1, 1, None));
        assert_eq!(response.code, 455);
        assert_eq!(handler.session.phase(), SessionPhase::Init);
    }

    #[test]
    fn record_while_playing_is_455() {
        let mut handler = handler();
        handler.session.assign_id(42);
        handler.session.set_phase(SessionPhase::Playing);
        let response = handler.dispatch(&Message::record("rtsp://localhost/out.wav", 2, 42, None));
        assert_eq!(response.code, 455);
        assert_eq!(handler.session.phase(), SessionPhase::Playing);
    }

    #[test]
    fn teardown_with_stale_session_id_is_454() {
        let mut handler = handler();
        handler.session.assign_id(42);
        handler.session.set_phase(SessionPhase::Ready);
        let response = handler.dispatch(&Message::teardown("rtsp://localhost/a.wav", 3, 41));
        assert_eq!(response.code, 454);
        assert_eq!(handler.session.phase(), SessionPhase::Ready);
    }

    #[test]
    fn play_missing_resource_is_404_and_stays_ready() {
        let mut handler = handler();
        handler.session.assign_id(42);
        handler.session.set_phase(SessionPhase::Ready);
        let response = handler.dispatch(&Message::play(
            "rtsp://localhost/definitely-not-here.wav",
            4,
            42,
            None,
        ));
        assert_eq!(response.code, 404);
        assert_eq!(handler.session.phase(), SessionPhase::Ready);
    }

    #[test]
    fn record_existing_target_is_403() {
        let target = std::env::temp_dir().join(format!(
            "wavecast-existing-{}.wav",
            std::process::id()
        ));
        std::fs::write(&target, b"occupied").unwrap();

        let mut handler = handler();
        handler.session.assign_id(42);
        handler.session.set_phase(SessionPhase::Ready);
        let uri = format!(
            "rtsp://localhost/{}",
            target.file_name().unwrap().to_str().unwrap()
        );
        let response = handler.dispatch(&Message::record(&uri, 5, 42, None));
        assert_eq!(response.code, 403);
        assert_eq!(handler.session.phase(), SessionPhase::Ready);

        let _ = std::fs::remove_file(&target);
    }

    #[test]
    fn data_on_control_channel_is_400() {
        let mut handler = handler();
        let response = handler.dispatch(&Message::Data(crate::protocol::DataMessage::end(0, 1)));
        assert_eq!(response.code, 400);
    }

    #[test]
    fn capabilities_lists_methods() {
        let mut handler = handler();
        let response = handler.dispatch(&Message::capabilities("rtsp://localhost/media", 1));
        assert!(response.is_ok());
        assert_eq!(response.public.as_deref(), Some(SUPPORTED_METHODS));
    }

    #[test]
    fn describe_returns_media_description() {
        let mut handler = handler();
        let response = handler.dispatch(&Message::describe("rtsp://localhost/media", 1, "application/sdp"));
        assert!(response.is_ok());
        assert_eq!(response.content_type.as_deref(), Some("application/sdp"));
        assert!(response.body.as_deref().unwrap().contains("L16/44100/2"));
    }

    #[test]
    fn resolve_rejects_escaping_targets() {
        let handler = handler();
        assert!(handler.resolve_resource("rtsp://localhost/../etc/passwd").is_none());
        assert!(handler.resolve_resource("rtsp://localhost/").is_none());
        assert!(handler.resolve_resource("not-a-target").is_none());
        assert!(handler.resolve_resource("rtsp://localhost/music/a.wav").is_some());
    }
}

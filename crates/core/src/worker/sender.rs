use std::fs;
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::Result;
use crate::protocol::{DataMessage, Message, MessageChannel};
use crate::worker::{FRAME_SIZE, PauseGate};

/// Control-loop handle to a running sender worker.
///
/// The worker reads the source file once, splits it into
/// [`FRAME_SIZE`]-byte frames and transmits them in ascending index order
/// as DATA messages, then emits the terminal END marker. Pausing suspends
/// the worker before its next frame; resuming continues from the same
/// frame, so no frame is ever dropped or duplicated.
pub struct SenderHandle {
    gate: Arc<PauseGate>,
    stream: TcpStream,
    thread: Option<JoinHandle<()>>,
}

impl SenderHandle {
    /// Spawn a sender thread streaming `source` over the given data-channel
    /// stream clone.
    pub fn spawn(stream: TcpStream, source: PathBuf, session_id: u32) -> Result<Self> {
        let gate = Arc::new(PauseGate::new());
        let worker_gate = gate.clone();
        let worker_stream = stream.try_clone()?;

        let thread = thread::Builder::new()
            .name("wavecast-sender".to_string())
            .spawn(move || {
                if let Err(e) = run(worker_stream, &source, session_id, &worker_gate) {
                    tracing::error!(error = %e, path = %source.display(), "sender worker aborted");
                }
            })?;

        Ok(SenderHandle {
            gate,
            stream,
            thread: Some(thread),
        })
    }

    /// Flip the pause flag and wake the worker. Returns `true` when the
    /// worker is now paused.
    pub fn toggle_pause(&self) -> bool {
        self.gate.toggle()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Block until the worker finishes its stream naturally.
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Terminate the worker: raise the stop flag (waking it if paused),
    /// break any blocked write by shutting the socket down, and join.
    pub fn stop(&mut self) {
        self.gate.stop();
        let _ = self.stream.shutdown(Shutdown::Both);
        self.wait();
    }
}

impl Drop for SenderHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn run(stream: TcpStream, source: &Path, session_id: u32, gate: &PauseGate) -> Result<()> {
    let bytes = fs::read(source)?;
    let mut channel = MessageChannel::new(stream)?;

    let total_chunks = bytes.len().div_ceil(FRAME_SIZE);
    tracing::info!(session_id, total_chunks, path = %source.display(), "sender worker started");

    let mut index: u32 = 0;
    for frame in bytes.chunks(FRAME_SIZE) {
        if !gate.wait_ready() {
            tracing::debug!(session_id, next_chunk = index, "sender worker stopped");
            return Ok(());
        }
        let payload = BASE64_STANDARD.encode(frame);
        channel.send(&Message::Data(DataMessage::chunk(index, session_id, payload)))?;
        index += 1;
    }

    // Zero-length sources fall straight through to the terminal marker.
    channel.send(&Message::Data(DataMessage::end(index, session_id)))?;
    tracing::info!(session_id, chunks = index, "sender worker finished");
    Ok(())
}

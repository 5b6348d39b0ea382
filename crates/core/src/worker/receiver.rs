use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{ParseErrorKind, Result, WavecastError};
use crate::protocol::{Message, MessageChannel};
use crate::worker::{BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

/// Control-loop handle to a running receiver worker.
///
/// The worker reads DATA messages from the data channel until the terminal
/// END marker, skipping chunks whose session id does not match (the channel
/// lives as long as the session, so chunks addressed to a prior stream are
/// filtered, not treated as errors). The accumulated PCM is then wrapped in
/// a 44.1 kHz / 16-bit / stereo WAV container at the target path and the
/// channel clone is shut down.
pub struct ReceiverHandle {
    stream: TcpStream,
    thread: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    /// Spawn a receiver thread persisting the incoming stream to `output`.
    pub fn spawn(stream: TcpStream, session_id: u32, output: PathBuf) -> Result<Self> {
        let worker_stream = stream.try_clone()?;

        let thread = thread::Builder::new()
            .name("wavecast-receiver".to_string())
            .spawn(move || {
                if let Err(e) = run(worker_stream, session_id, &output) {
                    tracing::error!(error = %e, path = %output.display(), "receiver worker failed");
                }
            })?;

        Ok(ReceiverHandle {
            stream,
            thread: Some(thread),
        })
    }

    /// Block until the worker sees the END marker and finishes persisting.
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Terminate the worker by shutting the socket down (unblocking its
    /// read) and joining. A worker that already finished joins immediately.
    pub fn stop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.wait();
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn run(stream: TcpStream, session_id: u32, output: &Path) -> Result<()> {
    let mut channel = MessageChannel::new(stream)?;
    tracing::info!(session_id, path = %output.display(), "receiver worker started");

    let mut pcm: Vec<u8> = Vec::new();
    let mut next_index: u32 = 0;
    loop {
        let message = match channel.recv() {
            Ok(message) => message,
            Err(WavecastError::ConnectionClosed) => {
                // Abort: the stream ends on the END marker, not on channel
                // closure. A close before the marker discards the partial
                // accumulation.
                tracing::warn!(session_id, chunks = next_index, "data channel closed before end marker");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Message::Data(data) = message else {
            tracing::warn!(session_id, "non-DATA message on data channel, skipping");
            continue;
        };
        if data.session_id != session_id {
            tracing::debug!(
                session_id,
                stray = data.session_id,
                "chunk for another session, skipping"
            );
            continue;
        }
        if data.is_end() {
            break;
        }
        if data.chunk_index != next_index {
            tracing::warn!(
                session_id,
                expected = next_index,
                received = data.chunk_index,
                "chunk index not monotonic"
            );
        }
        next_index = data.chunk_index + 1;

        let frame = BASE64_STANDARD
            .decode(data.payload.as_bytes())
            .map_err(|_| WavecastError::Parse {
                kind: ParseErrorKind::InvalidBody,
            })?;
        pcm.extend_from_slice(&frame);
    }

    write_wav(output, &pcm)?;
    channel.shutdown();
    tracing::info!(session_id, chunks = next_index, bytes = pcm.len(), path = %output.display(), "receiver worker finished");
    Ok(())
}

/// Wrap raw interleaved PCM in a WAV container at the fixed stream format.
fn write_wav(path: &Path, pcm: &[u8]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for sample in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(())
}

fn wav_error(e: hound::Error) -> WavecastError {
    match e {
        hound::Error::IoError(io) => WavecastError::Io(io),
        other => WavecastError::Io(std::io::Error::other(other.to_string())),
    }
}

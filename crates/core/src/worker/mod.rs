//! Streaming workers: the sender and receiver threads that move chunked
//! audio across a session's data channel.
//!
//! A session runs at most one worker at a time, spawned by PLAY (sender)
//! or RECORD (receiver) and joined at TEARDOWN. The pause flag on a sender
//! is the only state shared between the control loop and a worker thread;
//! it lives behind a mutex + condvar so a resume toggle wakes a suspended
//! worker without busy-polling.

pub mod receiver;
pub mod sender;

use parking_lot::{Condvar, Mutex};

pub use receiver::ReceiverHandle;
pub use sender::SenderHandle;

/// PCM sample rate of the streamed audio.
pub const SAMPLE_RATE: u32 = 44_100;
/// Channel count (stereo).
pub const CHANNELS: u16 = 2;
/// Bits per sample (signed little-endian).
pub const BITS_PER_SAMPLE: u16 = 16;
/// Milliseconds of audio per chunk.
pub const FRAME_MILLIS: usize = 10;

/// Bytes of PCM per chunk, derived from the audio format:
/// 44100 samples/s x 2 bytes/sample x 2 channels x 10 ms = 1764 bytes.
pub const FRAME_SIZE: usize =
    SAMPLE_RATE as usize * (BITS_PER_SAMPLE as usize / 8) * CHANNELS as usize * FRAME_MILLIS
        / 1000;

/// Condvar-guarded pause/stop flags for a sender worker.
///
/// Exactly two threads rendezvous here: the control loop toggles, the
/// worker waits. A toggle-to-resume (or a stop) notifies, so a suspended
/// worker reliably wakes without polling.
pub struct PauseGate {
    state: Mutex<GateState>,
    resumed: Condvar,
}

#[derive(Default)]
struct GateState {
    paused: bool,
    stopped: bool,
}

impl PauseGate {
    pub fn new() -> Self {
        PauseGate {
            state: Mutex::new(GateState::default()),
            resumed: Condvar::new(),
        }
    }

    /// Flip the pause flag and wake the worker. Returns the new value.
    pub fn toggle(&self) -> bool {
        let mut state = self.state.lock();
        state.paused = !state.paused;
        self.resumed.notify_all();
        state.paused
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Request termination and wake the worker if it is suspended.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.resumed.notify_all();
    }

    /// Block while paused. Returns `false` once stopped, `true` when the
    /// worker may emit its next frame.
    pub fn wait_ready(&self) -> bool {
        let mut state = self.state.lock();
        while state.paused && !state.stopped {
            self.resumed.wait(&mut state);
        }
        !state.stopped
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The single worker a session may have running.
pub enum ActiveWorker {
    Sender(SenderHandle),
    Receiver(ReceiverHandle),
}

impl ActiveWorker {
    /// Stop the worker and join its thread. Safe to call on a worker that
    /// already finished on its own.
    pub fn stop(&mut self) {
        match self {
            ActiveWorker::Sender(handle) => handle.stop(),
            ActiveWorker::Receiver(handle) => handle.stop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn frame_size_matches_audio_format() {
        // 10ms of 44.1kHz 16-bit stereo PCM
        assert_eq!(FRAME_SIZE, 1764);
    }

    #[test]
    fn chunking_reconstructs_source_exactly() {
        for len in [0usize, 1, FRAME_SIZE - 1, FRAME_SIZE, FRAME_SIZE + 1, 5 * FRAME_SIZE + 123] {
            let source: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frames: Vec<&[u8]> = source.chunks(FRAME_SIZE).collect();
            if len == 0 {
                assert!(frames.is_empty());
            }
            let rebuilt: Vec<u8> = frames.concat();
            assert_eq!(rebuilt, source, "length {len}");
        }
    }

    #[test]
    fn double_toggle_is_a_no_op() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        assert!(gate.toggle());
        assert!(!gate.toggle());
        assert!(!gate.is_paused());
        assert!(gate.wait_ready());
    }

    #[test]
    fn toggle_wakes_a_suspended_waiter() {
        let gate = Arc::new(PauseGate::new());
        gate.toggle();

        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || waiter_gate.wait_ready());

        thread::sleep(Duration::from_millis(50));
        gate.toggle();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn stop_wakes_a_suspended_waiter() {
        let gate = Arc::new(PauseGate::new());
        gate.toggle();

        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || waiter_gate.wait_ready());

        thread::sleep(Duration::from_millis(50));
        gate.stop();
        assert!(!waiter.join().unwrap());
    }
}

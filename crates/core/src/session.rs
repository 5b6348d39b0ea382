//! Per-connection session state.
//!
//! A [`Session`] is created when a control connection is accepted and is
//! owned exclusively by that connection's control loop thread — there is no
//! cross-connection session registry and no shared mutable session state.
//! It is destroyed when TEARDOWN completes or the connection drops.
//!
//! ## Phase machine
//!
//! ```text
//! SETUP              Init -> Ready
//! PLAY               Ready -> Playing
//! PAUSE              Playing -> Ready   (worker keeps its position)
//! RECORD             Ready -> Recording
//! TEARDOWN           any but Init -> Teardown (terminal)
//! ```
//!
//! Pausing is a worker-level toggle, not a distinct phase: PAUSE returns the
//! session to `Ready`, and a subsequent PLAY resumes the existing sender
//! worker from the next unsent frame.

use crate::protocol::{Method, MessageChannel};
use crate::worker::ActiveWorker;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No SETUP received yet.
    Init,
    /// Data channel established, nothing streaming.
    Ready,
    /// A sender worker is delivering chunks to the peer.
    Playing,
    /// A receiver worker is accumulating chunks from the peer.
    Recording,
    /// Terminal; the control loop exits after entering it.
    Teardown,
}

impl SessionPhase {
    /// The method-by-phase legality table. A method issued while the session
    /// is in a phase this returns `false` for is answered with 455 and the
    /// phase is left unchanged.
    pub fn allows(self, method: Method) -> bool {
        match method {
            Method::Capabilities => matches!(self, Self::Init | Self::Recording),
            Method::Describe => self == Self::Init,
            Method::Setup => matches!(self, Self::Init | Self::Ready),
            Method::Play => self == Self::Ready,
            Method::Pause => self == Self::Playing,
            Method::Record => self == Self::Ready,
            Method::Teardown => self != Self::Init,
        }
    }
}

/// State bound to one control connection from accept through TEARDOWN.
pub struct Session {
    phase: SessionPhase,
    /// Assigned by the first successful SETUP; immutable afterwards.
    session_id: Option<u32>,
    /// The session-scoped chunk transport. Created once during SETUP,
    /// reused across PLAY/PAUSE/RECORD, closed at TEARDOWN.
    pub(crate) data_channel: Option<MessageChannel>,
    /// Port the data channel was advertised on, echoed on re-SETUP.
    pub(crate) data_port: Option<u16>,
    /// At most one streaming worker at a time — a session cannot stream
    /// and record concurrently.
    pub(crate) worker: Option<ActiveWorker>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            phase: SessionPhase::Init,
            session_id: None,
            data_channel: None,
            data_port: None,
            worker: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        tracing::debug!(old_phase = ?self.phase, new_phase = ?phase, "phase transition");
        self.phase = phase;
    }

    pub fn id(&self) -> Option<u32> {
        self.session_id
    }

    /// Record the id minted by the first successful SETUP. A later SETUP
    /// keeps the existing id, so the id is stable for the session's life.
    pub(crate) fn assign_id(&mut self, session_id: u32) {
        if self.session_id.is_none() {
            self.session_id = Some(session_id);
        }
    }

    /// Whether a message's session id matches the assigned one. A mismatch
    /// is answered with 454 before any side effect happens.
    pub(crate) fn id_matches(&self, claimed: u32) -> bool {
        self.session_id == Some(claimed)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METHODS: [Method; 7] = [
        Method::Capabilities,
        Method::Describe,
        Method::Setup,
        Method::Play,
        Method::Pause,
        Method::Record,
        Method::Teardown,
    ];

    const ALL_PHASES: [SessionPhase; 5] = [
        SessionPhase::Init,
        SessionPhase::Ready,
        SessionPhase::Playing,
        SessionPhase::Recording,
        SessionPhase::Teardown,
    ];

    /// The full legality table, phase by phase.
    #[test]
    fn method_phase_table_is_exact() {
        use Method::*;
        use SessionPhase::*;

        let legal: &[(Method, &[SessionPhase])] = &[
            (Capabilities, &[Init, Recording]),
            (Describe, &[Init]),
            (Setup, &[Init, Ready]),
            (Play, &[Ready]),
            (Pause, &[Playing]),
            (Record, &[Ready]),
            (Method::Teardown, &[Ready, Playing, Recording, SessionPhase::Teardown]),
        ];

        for (method, phases) in legal {
            for phase in ALL_PHASES {
                assert_eq!(
                    phase.allows(*method),
                    phases.contains(&phase),
                    "{method:?} in {phase:?}"
                );
            }
        }
    }

    #[test]
    fn nothing_but_capabilities_describe_setup_in_init() {
        for method in ALL_METHODS {
            let expected = matches!(
                method,
                Method::Capabilities | Method::Describe | Method::Setup
            );
            assert_eq!(SessionPhase::Init.allows(method), expected);
        }
    }

    #[test]
    fn session_id_is_immutable_once_assigned() {
        let mut session = Session::new();
        assert_eq!(session.id(), None);
        session.assign_id(111111);
        session.assign_id(222222);
        assert_eq!(session.id(), Some(111111));
        assert!(session.id_matches(111111));
        assert!(!session.id_matches(222222));
    }
}

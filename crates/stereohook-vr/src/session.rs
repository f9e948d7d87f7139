//! Headset-runtime session phase tracking.
//!
//! Phases advance only from events drained from the runtime's event queue.
//! Entering `Ready` begins the session, entering `Stopping` ends it, and the
//! terminal phases (`Exiting`, `LossPending`) latch until a fresh session is
//! created.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{error, info, warn};

use crate::VrResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionPhase {
    Unknown = 0,
    Idle = 1,
    Ready = 2,
    Synchronized = 3,
    Visible = 4,
    Focused = 5,
    Stopping = 6,
    LossPending = 7,
    Exiting = 8,
}

impl SessionPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SessionPhase::Idle,
            2 => SessionPhase::Ready,
            3 => SessionPhase::Synchronized,
            4 => SessionPhase::Visible,
            5 => SessionPhase::Focused,
            6 => SessionPhase::Stopping,
            7 => SessionPhase::LossPending,
            8 => SessionPhase::Exiting,
            _ => SessionPhase::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionPhase::Synchronized | SessionPhase::Visible | SessionPhase::Focused
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Exiting | SessionPhase::LossPending)
    }
}

/// Runtime call the owner must issue after a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    None,
    BeginSession,
    EndSession,
}

/// The begin/end calls a session owner provides to [`SessionStateMachine::drive`].
pub trait SessionLifecycle {
    fn begin_session(&mut self) -> VrResult<()>;
    fn end_session(&mut self) -> VrResult<()>;
}

#[derive(Debug)]
pub struct SessionStateMachine {
    phase: AtomicU8,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(SessionPhase::Unknown as u8),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// True only in `Synchronized`, `Visible` and `Focused`.
    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Records a phase reported by the runtime and returns the call it requires.
    ///
    /// Once a terminal phase is reached further events are ignored until
    /// [`reset`](Self::reset).
    pub fn apply(&self, next: SessionPhase) -> PhaseAction {
        let current = self.phase();
        if current.is_terminal() {
            return PhaseAction::None;
        }
        if current == next {
            return PhaseAction::None;
        }
        self.phase.store(next as u8, Ordering::Release);

        match next {
            SessionPhase::Ready => {
                info!("session READY, beginning session");
                PhaseAction::BeginSession
            }
            SessionPhase::Stopping => {
                info!("session STOPPING, ending session");
                PhaseAction::EndSession
            }
            SessionPhase::LossPending => {
                warn!("session LOSS_PENDING, headset may have disconnected");
                PhaseAction::None
            }
            SessionPhase::Exiting => {
                info!("session EXITING");
                PhaseAction::None
            }
            other => {
                info!(phase = ?other, "session phase changed");
                PhaseAction::None
            }
        }
    }

    /// Applies `next` and issues the resulting begin/end call on `lifecycle`.
    ///
    /// A failed end is only a warning since the runtime may already have torn
    /// the session down.
    pub fn drive<L: SessionLifecycle + ?Sized>(&self, next: SessionPhase, lifecycle: &mut L) {
        match self.apply(next) {
            PhaseAction::BeginSession => {
                if let Err(err) = lifecycle.begin_session() {
                    error!("failed to begin session: {err}");
                }
            }
            PhaseAction::EndSession => {
                if let Err(err) = lifecycle.end_session() {
                    warn!("failed to end session gracefully: {err}");
                }
            }
            PhaseAction::None => {}
        }
    }

    /// Clears a terminal latch for a freshly created session.
    pub fn reset(&self) {
        self.phase
            .store(SessionPhase::Unknown as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VrError;

    #[derive(Default)]
    struct Recorder {
        begins: usize,
        ends: usize,
        fail_end: bool,
    }

    impl SessionLifecycle for Recorder {
        fn begin_session(&mut self) -> VrResult<()> {
            self.begins += 1;
            Ok(())
        }

        fn end_session(&mut self) -> VrResult<()> {
            self.ends += 1;
            if self.fail_end {
                Err(VrError::Runtime("session already lost".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn running_only_in_middle_three_phases() {
        let sm = SessionStateMachine::new();
        let sequence = [
            (SessionPhase::Idle, false),
            (SessionPhase::Ready, false),
            (SessionPhase::Synchronized, true),
            (SessionPhase::Visible, true),
            (SessionPhase::Focused, true),
            (SessionPhase::Stopping, false),
            (SessionPhase::Exiting, false),
        ];
        assert!(!sm.is_running());
        for (phase, running) in sequence {
            sm.apply(phase);
            assert_eq!(sm.phase(), phase);
            assert_eq!(sm.is_running(), running, "phase {phase:?}");
        }
        assert!(sm.is_terminal());
    }

    #[test]
    fn ready_begins_and_stopping_ends() {
        let sm = SessionStateMachine::new();
        let mut rec = Recorder::default();
        sm.drive(SessionPhase::Idle, &mut rec);
        sm.drive(SessionPhase::Ready, &mut rec);
        assert_eq!(rec.begins, 1);
        sm.drive(SessionPhase::Synchronized, &mut rec);
        sm.drive(SessionPhase::Stopping, &mut rec);
        assert_eq!(rec.ends, 1);
    }

    #[test]
    fn failed_end_is_not_fatal() {
        let sm = SessionStateMachine::new();
        let mut rec = Recorder {
            fail_end: true,
            ..Default::default()
        };
        sm.drive(SessionPhase::Ready, &mut rec);
        sm.drive(SessionPhase::Stopping, &mut rec);
        assert_eq!(rec.ends, 1);
        assert_eq!(sm.phase(), SessionPhase::Stopping);
        sm.drive(SessionPhase::Idle, &mut rec);
        assert_eq!(sm.phase(), SessionPhase::Idle);
    }

    #[test]
    fn loss_pending_latches() {
        let sm = SessionStateMachine::new();
        let mut rec = Recorder::default();
        for phase in [
            SessionPhase::Idle,
            SessionPhase::Ready,
            SessionPhase::Synchronized,
            SessionPhase::Visible,
            SessionPhase::Focused,
        ] {
            sm.drive(phase, &mut rec);
        }
        assert!(sm.is_running());

        sm.drive(SessionPhase::LossPending, &mut rec);
        assert!(!sm.is_running());
        assert!(sm.is_terminal());

        // A late READY must not restart the lost session.
        sm.drive(SessionPhase::Ready, &mut rec);
        assert_eq!(rec.begins, 1);
        assert_eq!(sm.phase(), SessionPhase::LossPending);

        sm.reset();
        assert_eq!(sm.phase(), SessionPhase::Unknown);
        sm.drive(SessionPhase::Ready, &mut rec);
        assert_eq!(rec.begins, 2);
    }

    #[test]
    fn repeated_phase_does_not_repeat_begin() {
        let sm = SessionStateMachine::new();
        let mut rec = Recorder::default();
        sm.drive(SessionPhase::Ready, &mut rec);
        sm.drive(SessionPhase::Ready, &mut rec);
        assert_eq!(rec.begins, 1);
    }
}

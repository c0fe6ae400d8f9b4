//! Session identity and phase.

use std::fmt;
use std::time::Duration;

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Never connected.
    #[default]
    Idle,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for Hello.
    AwaitingHello,
    /// Identify sent, waiting for `READY`.
    Identifying,
    /// Resume sent, waiting for `RESUMED`.
    Resuming,
    /// Session established.
    Ready,
    /// Transport gone; a reconnect may follow.
    Disconnected,
    /// Closed for good.
    Closed,
}

impl Phase {
    /// Snake-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        }
    }

    /// Whether Hello has been answered on the current connection.
    pub fn past_hello(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Ready)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable session state, owned by one [`GatewaySession`](crate::GatewaySession).
///
/// `session_id` and `sequence` only mean something together: a resume needs
/// both.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// Id assigned by `READY`.
    pub session_id: Option<String>,
    /// Highest dispatch sequence seen.
    pub sequence: Option<u64>,
    /// The next Hello should be answered with Resume.
    pub should_resume: bool,
    /// Endpoint `READY` asked us to resume against.
    pub resume_gateway_url: Option<String>,
    /// Generation of the current connection.
    pub epoch: u64,
    /// Lifecycle phase.
    pub phase: Phase,
}

impl SessionState {
    /// Fold a dispatch sequence in. Never moves backwards; returns whether
    /// the cursor advanced.
    pub fn observe_sequence(&mut self, seq: u64) -> bool {
        match self.sequence {
            Some(current) if current >= seq => false,
            _ => {
                self.sequence = Some(seq);
                true
            }
        }
    }

    /// Session id and sequence, when a resume is both wanted and possible.
    pub fn resume_target(&self) -> Option<(&str, u64)> {
        if !self.should_resume {
            return None;
        }
        Some((self.session_id.as_deref()?, self.sequence?))
    }

    /// Forget the session so the next Hello is answered with Identify.
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_gateway_url = None;
        self.should_resume = false;
    }
}

/// Snapshot published to [`SessionHandle`](crate::SessionHandle)s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Lifecycle phase.
    pub phase: Phase,
    /// Current session id.
    pub session_id: Option<String>,
    /// Last dispatch sequence.
    pub sequence: Option<u64>,
    /// Last heartbeat round trip.
    pub latency: Option<Duration>,
    /// Connection generation.
    pub epoch: u64,
}

impl SessionStatus {
    /// Whether the session is established.
    pub fn ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn sequence_never_regresses() {
        let mut state = SessionState::default();
        assert!(state.observe_sequence(5));
        assert!(!state.observe_sequence(3));
        assert!(!state.observe_sequence(5));
        assert!(state.observe_sequence(6));
        assert_eq!(state.sequence, Some(6));
    }

    #[test]
    fn sequence_zero_is_recorded() {
        let mut state = SessionState::default();
        assert!(state.observe_sequence(0));
        assert_eq!(state.sequence, Some(0));
    }

    #[test]
    fn resume_target_needs_flag_id_and_sequence() {
        let mut state = SessionState {
            session_id: Some("abc".into()),
            sequence: Some(9),
            ..SessionState::default()
        };
        assert_eq!(state.resume_target(), None);
        state.should_resume = true;
        assert_eq!(state.resume_target(), Some(("abc", 9)));
        state.sequence = None;
        assert_eq!(state.resume_target(), None);
    }

    #[test]
    fn clear_session_drops_identity() {
        let mut state = SessionState {
            session_id: Some("abc".into()),
            sequence: Some(9),
            should_resume: true,
            resume_gateway_url: Some("wss://resume".into()),
            epoch: 3,
            phase: Phase::Ready,
        };
        state.clear_session();
        assert_eq!(state.session_id, None);
        assert_eq!(state.sequence, None);
        assert_eq!(state.resume_gateway_url, None);
        assert!(!state.should_resume);
        assert_eq!(state.epoch, 3);
    }

    #[test]
    fn only_ready_is_ready() {
        let status = SessionStatus {
            phase: Phase::Resuming,
            ..SessionStatus::default()
        };
        assert!(!status.ready());
        assert!(
            SessionStatus {
                phase: Phase::Ready,
                ..status
            }
            .ready()
        );
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::AwaitingHello.to_string(), "awaiting_hello");
        assert!(Phase::Resuming.past_hello());
        assert!(!Phase::AwaitingHello.past_hello());
    }

    proptest! {
        #[test]
        fn sequence_is_running_max(seqs in proptest::collection::vec(0u64..1_000, 1..64)) {
            let mut state = SessionState::default();
            for &seq in &seqs {
                let _ = state.observe_sequence(seq);
            }
            prop_assert_eq!(state.sequence, seqs.iter().copied().max());
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Session lifecycle state
///
/// `Idle -> Offering -> AwaitingAnswer -> Connected -> Closed`; `Failed`
/// can be entered from any non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Closed,
    Failed { kind: ErrorKind, message: String },
}

impl SessionState {
    /// Closed or failed; a failed session can still move to closed on `stop()`
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed { .. })
    }

    /// Offering or awaiting the answer
    pub fn is_negotiating(&self) -> bool {
        matches!(self, SessionState::Offering | SessionState::AwaitingAnswer)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    ///
    /// Closed absorbs everything; a failed session can still be stopped.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Idle, Offering) | (Offering, AwaitingAnswer) | (AwaitingAnswer, Connected) => true,
            _ => false,
        }
    }

    /// Short name used in logs and events
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Offering => "offering",
            SessionState::AwaitingAnswer => "awaiting_answer",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
            SessionState::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Failed { kind, message } => write!(f, "failed ({}): {}", kind, message),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed {
            kind: ErrorKind::NegotiationFailed,
            message: "403".to_string(),
        }
        .is_terminal());
        assert!(SessionState::AwaitingAnswer.is_negotiating());
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        let failed = Failed {
            kind: ErrorKind::WebRtc,
            message: "ice".to_string(),
        };

        assert!(Idle.can_transition_to(&Offering));
        assert!(Offering.can_transition_to(&AwaitingAnswer));
        assert!(AwaitingAnswer.can_transition_to(&Connected));
        assert!(Connected.can_transition_to(&failed));
        assert!(failed.can_transition_to(&Closed));
        assert!(Idle.can_transition_to(&Closed));

        assert!(!Idle.can_transition_to(&Connected));
        assert!(!Connected.can_transition_to(&Offering));
        assert!(!failed.can_transition_to(&Connected));
        assert!(!Closed.can_transition_to(&Closed));
        assert!(!Closed.can_transition_to(&failed));
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::AwaitingAnswer.to_string(), "awaiting_answer");
        let failed = SessionState::Failed {
            kind: ErrorKind::NegotiationFailed,
            message: "HTTP 403".to_string(),
        };
        assert_eq!(failed.to_string(), "failed (negotiation_failed): HTTP 403");
    }
}

//! Session state machine states.

use serde::Serialize;

/// State of the mirroring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    /// No quorum yet: waiting for a leader and enough followers.
    #[default]
    WaitingForParties,
    /// Leader present and follower quorum met; changes are mirrored.
    Active,
    /// The party set changed after the session started.
    Compromised,
}

impl SessionState {
    /// Whether quorum was reached at some point and not yet reset.
    pub fn is_started(self) -> bool {
        matches!(self, Self::Active | Self::Compromised)
    }

    /// Whether a new registration must compromise the session first.
    pub fn rejects_late_joiners(self) -> bool {
        self.is_started()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitingForParties => write!(f, "WaitingForParties"),
            Self::Active => write!(f, "Active"),
            Self::Compromised => write!(f, "Compromised"),
        }
    }
}

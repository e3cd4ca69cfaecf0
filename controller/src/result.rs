//! Outcome of a wanted-state transition check.

use std::fmt;

/// Verdict on a requested wanted-state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// The change is safe and must be persisted.
    MustSetWantedState,
    /// The requested state is already in effect.
    AlreadySet,
    /// The change is refused.
    Disallowed(String),
}

impl TransitionResult {
    pub fn disallowed(reason: impl Into<String>) -> Self {
        TransitionResult::Disallowed(reason.into())
    }

    pub fn setting_wanted_state_is_allowed(&self) -> bool {
        matches!(self, TransitionResult::MustSetWantedState)
    }

    pub fn wanted_state_already_set(&self) -> bool {
        matches!(self, TransitionResult::AlreadySet)
    }

    pub fn is_disallowed(&self) -> bool {
        matches!(self, TransitionResult::Disallowed(_))
    }

    /// Action name used in logs and responses.
    pub fn action(&self) -> &'static str {
        match self {
            TransitionResult::MustSetWantedState => "MUST_SET_WANTED_STATE",
            TransitionResult::AlreadySet => "ALREADY_SET",
            TransitionResult::Disallowed(_) => "DISALLOWED",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            TransitionResult::MustSetWantedState => "Preconditions fulfilled and new state different",
            TransitionResult::AlreadySet => "Basic preconditions fulfilled and new state is already effective",
            TransitionResult::Disallowed(reason) => reason,
        }
    }
}

impl fmt::Display for TransitionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action {}: {}", self.action(), self.reason())
    }
}

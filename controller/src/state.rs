//! Controller lifecycle state.

/// Controller operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Controller has just taken over and has not yet observed the cluster
    /// long enough to trust its view. Safe-mode changes are refused.
    Bootstrapping,
    /// Controller is running and evaluating requests.
    Running,
    /// Controller is stopped.
    Stopped,
}

impl ControllerState {
    /// Safe-mode transitions are refused while in moratorium.
    pub fn in_moratorium(&self) -> bool {
        matches!(self, ControllerState::Bootstrapping)
    }

    /// Check if the controller is accepting requests.
    pub fn accepts_requests(&self) -> bool {
        !matches!(self, ControllerState::Stopped)
    }
}

//! Node states and the (state, description) pair attached to every node.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::FleetGateError;

/// Operational state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Serving and holding data.
    Up,
    /// Not available.
    Down,
    /// Temporarily suspended, data kept.
    Maintenance,
    /// Available but being drained of data.
    Retired,
    /// Starting up and loading bucket metadata.
    Initializing,
    /// Shutting down.
    Stopping,
}

impl State {
    /// Single-character code used in serialized cluster states.
    pub fn serialized_char(&self) -> char {
        match self {
            State::Up => 'u',
            State::Down => 'd',
            State::Maintenance => 'm',
            State::Retired => 'r',
            State::Initializing => 'i',
            State::Stopping => 's',
        }
    }

    /// Look up a state from its serialized character.
    pub fn from_serialized_char(c: char) -> Option<Self> {
        match c {
            'u' => Some(State::Up),
            'd' => Some(State::Down),
            'm' => Some(State::Maintenance),
            'r' => Some(State::Retired),
            'i' => Some(State::Initializing),
            's' => Some(State::Stopping),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            State::Up => "Up",
            State::Down => "Down",
            State::Maintenance => "Maintenance",
            State::Retired => "Retired",
            State::Initializing => "Initializing",
            State::Stopping => "Stopping",
        }
    }

    /// Uppercase name, e.g. `MAINTENANCE`.
    pub fn upper(&self) -> String {
        self.name().to_uppercase()
    }

    /// Up or Retired: the node still carries its share of the load.
    pub fn is_up_or_retired(&self) -> bool {
        matches!(self, State::Up | State::Retired)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for State {
    type Err = FleetGateError;

    /// Accepts the serialized character or the full name, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let state = match lower.as_str() {
            "up" => Some(State::Up),
            "down" => Some(State::Down),
            "maintenance" => Some(State::Maintenance),
            "retired" => Some(State::Retired),
            "initializing" => Some(State::Initializing),
            "stopping" => Some(State::Stopping),
            _ if lower.chars().count() == 1 => lower.chars().next().and_then(State::from_serialized_char),
            _ => None,
        };
        state.ok_or_else(|| FleetGateError::InvalidNodeState(format!("unknown state '{}'", s)))
    }
}

/// A state together with its free-form description.
///
/// For wanted states the description identifies who set it, so two requests
/// carrying the same description are treated as the same coordinated operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeState {
    pub state: State,
    #[serde(default)]
    pub description: String,
}

impl NodeState {
    pub fn new(state: State) -> Self {
        Self {
            state,
            description: String::new(),
        }
    }

    pub fn with_description(state: State, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }

    pub fn up() -> Self {
        Self::new(State::Up)
    }

    pub fn down() -> Self {
        Self::new(State::Down)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Same state and same description.
    pub fn is_equivalent(&self, other: &NodeState) -> bool {
        self.state == other.state && self.description == other.description
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::up()
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.state)
        } else {
            write!(f, "{}: {}", self.state, self.description)
        }
    }
}

impl From<State> for NodeState {
    fn from(state: State) -> Self {
        NodeState::new(state)
    }
}

//! Set-node-state request and response types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use fleetgate_common::{FleetGateError, Node, NodeState};

/// Safety condition attached to a wanted-state request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Apply without any checks.
    Force,
    /// Apply only if the cluster stays safe.
    Safe,
    /// A condition this controller does not implement.
    Other(String),
}

impl Condition {
    /// Uppercase name used in responses.
    pub fn name(&self) -> String {
        match self {
            Condition::Force => "FORCE".to_string(),
            Condition::Safe => "SAFE".to_string(),
            Condition::Other(name) => name.to_uppercase(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Condition {
    type Err = FleetGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(FleetGateError::InvalidCondition(
                "condition cannot be empty".to_string(),
            ));
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "force" => Condition::Force,
            "safe" => Condition::Safe,
            _ => Condition::Other(trimmed.to_string()),
        })
    }
}

/// Request to change the wanted state of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNodeStateRequest {
    pub node: Node,
    pub new_state: NodeState,
    pub condition: Condition,
    /// Evaluate only; never persist the new state.
    #[serde(default)]
    pub probe: bool,
}

impl SetNodeStateRequest {
    pub fn new(node: Node, new_state: NodeState, condition: Condition) -> Self {
        Self {
            node,
            new_state,
            condition,
            probe: false,
        }
    }

    pub fn safe(node: Node, new_state: NodeState) -> Self {
        Self::new(node, new_state, Condition::Safe)
    }

    pub fn force(node: Node, new_state: NodeState) -> Self {
        Self::new(node, new_state, Condition::Force)
    }

    pub fn probe(mut self) -> Self {
        self.probe = true;
        self
    }
}

/// Answer to a set-node-state request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResponse {
    pub reason: String,
    /// Whether the wanted state was changed (or would be, for a probe).
    pub was_modified: bool,
}

impl SetResponse {
    pub fn new(reason: impl Into<String>, was_modified: bool) -> Self {
        Self {
            reason: reason.into(),
            was_modified,
        }
    }
}

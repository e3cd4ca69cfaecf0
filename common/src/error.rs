//! Error types for FleetGate.
//!
//! These cover malformed input and registry misuse. A refused state change is
//! not an error: the checker reports it as a disallowed result.

use crate::Node;
use thiserror::Error;

/// Main error type for FleetGate operations.
#[derive(Error, Debug)]
pub enum FleetGateError {
    /// Node is not present in the cluster registry.
    #[error("Unknown node {0}")]
    UnknownNode(Node),

    /// Malformed node identifier.
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Malformed node state.
    #[error("Invalid node state: {0}")]
    InvalidNodeState(String),

    /// Malformed request condition.
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Cluster state string could not be parsed.
    #[error("Invalid cluster state at token '{token}': {reason}")]
    InvalidClusterState { token: String, reason: String },

    /// Host info document could not be decoded.
    #[error("Invalid host info: {0}")]
    InvalidHostInfo(#[from] serde_json::Error),

    /// Group topology configuration is inconsistent.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Controller is not in a state where it accepts requests.
    #[error("Controller unavailable: {0}")]
    ControllerUnavailable(String),
}

impl FleetGateError {
    /// Get error code for logs and responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            FleetGateError::UnknownNode(_) => "UNKNOWN_NODE",
            FleetGateError::InvalidNode(_) => "INVALID_NODE",
            FleetGateError::InvalidNodeState(_) => "INVALID_NODE_STATE",
            FleetGateError::InvalidCondition(_) => "INVALID_CONDITION",
            FleetGateError::InvalidClusterState { .. } => "INVALID_CLUSTER_STATE",
            FleetGateError::InvalidHostInfo(_) => "INVALID_HOST_INFO",
            FleetGateError::InvalidTopology(_) => "INVALID_TOPOLOGY",
            FleetGateError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            FleetGateError::ControllerUnavailable(_) => "CONTROLLER_UNAVAILABLE",
        }
    }

    pub(crate) fn cluster_state(token: &str, reason: impl Into<String>) -> Self {
        FleetGateError::InvalidClusterState {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for FleetGate operations.
pub type Result<T> = std::result::Result<T, FleetGateError>;

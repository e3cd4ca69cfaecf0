//! FleetGate Controller
//!
//! Safety gate for wanted-state changes in a content cluster. The
//! [`NodeStateChangeChecker`] decides whether a node may be suspended,
//! removed or brought back without risking data, and [`ClusterController`]
//! applies the requests it allows.

pub mod checker;
pub mod cluster_info;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod request;
pub mod result;
pub mod state;
pub mod topology;

pub use checker::NodeStateChangeChecker;
pub use cluster_info::{ClusterInfo, ClusterInfoSnapshot, NodeInfo};
pub use config::{CheckerConfig, ControllerConfig};
pub use controller::ClusterController;
pub use request::{Condition, SetNodeStateRequest, SetResponse};
pub use result::TransitionResult;
pub use state::ControllerState;
pub use topology::{Distribution, DistributionConfig, FlatTopology, Group, GroupConfig, GroupTopology};

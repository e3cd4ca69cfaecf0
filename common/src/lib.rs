//! FleetGate Common Types
//!
//! Shared vocabulary for the content cluster controller: node identities,
//! node states, versioned cluster states and the host info nodes report.

pub mod node;
pub mod state;
pub mod cluster_state;
pub mod host_info;
pub mod error;

pub use node::*;
pub use state::*;
pub use cluster_state::*;
pub use host_info::*;
pub use error::*;

//! Node identity types for a content cluster.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::FleetGateError;

/// Role a node plays in the content cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Stores buckets of documents.
    Storage,
    /// Routes operations and tracks replica placement.
    Distributor,
}

impl NodeType {
    /// Lowercase name, as used in node identifiers and cluster state strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Storage => "storage",
            NodeType::Distributor => "distributor",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = FleetGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage" => Ok(NodeType::Storage),
            "distributor" => Ok(NodeType::Distributor),
            other => Err(FleetGateError::InvalidNode(format!(
                "unknown node type '{}'",
                other
            ))),
        }
    }
}

/// A node in the cluster, identified by role and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node {
    node_type: NodeType,
    index: u16,
}

impl Node {
    /// Create a node identifier.
    pub const fn new(node_type: NodeType, index: u16) -> Self {
        Self { node_type, index }
    }

    /// Storage node with the given index.
    pub const fn storage(index: u16) -> Self {
        Self::new(NodeType::Storage, index)
    }

    /// Distributor with the given index.
    pub const fn distributor(index: u16) -> Self {
        Self::new(NodeType::Distributor, index)
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_type, self.index)
    }
}

/// Parses the `storage.3` / `distributor.0` form.
impl FromStr for Node {
    type Err = FleetGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node_type, index) = s
            .split_once('.')
            .ok_or_else(|| FleetGateError::InvalidNode(format!("expected <type>.<index>, got '{}'", s)))?;
        let index = index
            .parse()
            .map_err(|_| FleetGateError::InvalidNode(format!("invalid node index in '{}'", s)))?;
        Ok(Node::new(node_type.parse()?, index))
    }
}

/// A node index present in the cluster configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfiguredNode {
    /// Index shared by the storage node and distributor on this host.
    pub index: u16,
    /// Whether the configuration marks the node as retired.
    #[serde(default)]
    pub retired: bool,
}

impl ConfiguredNode {
    pub fn new(index: u16, retired: bool) -> Self {
        Self { index, retired }
    }
}

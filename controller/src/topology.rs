//! Redundancy topology of a content cluster.
//!
//! A flat cluster has a single root group holding every node. A hierarchical
//! cluster splits nodes into leaf groups, each holding a full set of
//! replicas, so a whole leaf group may be taken down at once.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use fleetgate_common::{FleetGateError, Result};

/// A group in the topology tree. Only leaf groups carry nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    index: u16,
    name: String,
    nodes: Vec<u16>,
    subgroups: Vec<Group>,
}

impl Group {
    pub fn leaf(index: u16, name: impl Into<String>, nodes: Vec<u16>) -> Self {
        Self {
            index,
            name: name.into(),
            nodes,
            subgroups: Vec::new(),
        }
    }

    pub fn inner(index: u16, name: impl Into<String>, subgroups: Vec<Group>) -> Self {
        Self {
            index,
            name: name.into(),
            nodes: Vec::new(),
            subgroups,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member storage node indices.
    pub fn nodes(&self) -> &[u16] {
        &self.nodes
    }

    pub fn is_leaf(&self) -> bool {
        self.subgroups.is_empty()
    }

    pub fn contains_node(&self, index: u16) -> bool {
        self.nodes.contains(&index)
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Group>) {
        if self.is_leaf() {
            leaves.push(self);
        } else {
            for group in &self.subgroups {
                group.collect_leaves(leaves);
            }
        }
    }
}

/// Read access to the group layout, as needed by the transition checker.
pub trait GroupTopology: Send + Sync {
    /// True when nodes are split into more than the root group.
    fn is_hierarchical(&self) -> bool;

    /// Leaf groups in definition order. Empty for a flat topology.
    fn leaf_groups(&self) -> Vec<&Group>;

    /// The leaf group holding the given storage node.
    fn leaf_group_of(&self, node_index: u16) -> Option<&Group> {
        self.leaf_groups()
            .into_iter()
            .find(|group| group.contains_node(node_index))
    }
}

/// Topology without groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatTopology;

impl GroupTopology for FlatTopology {
    fn is_hierarchical(&self) -> bool {
        false
    }

    fn leaf_groups(&self) -> Vec<&Group> {
        Vec::new()
    }
}

/// Serialized form of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub index: u16,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<u16>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Serialized form of a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub redundancy: u32,
    pub ready_copies: u32,
    pub group: GroupConfig,
}

/// Validated group tree with its replication settings.
#[derive(Debug, Clone)]
pub struct Distribution {
    redundancy: u32,
    ready_copies: u32,
    root: Group,
}

impl Distribution {
    pub fn from_config(config: DistributionConfig) -> Result<Self> {
        if config.redundancy == 0 {
            return Err(FleetGateError::InvalidTopology(
                "redundancy must be at least 1".to_string(),
            ));
        }
        if config.ready_copies > config.redundancy {
            return Err(FleetGateError::InvalidTopology(format!(
                "ready copies ({}) cannot exceed redundancy ({})",
                config.ready_copies, config.redundancy
            )));
        }

        let mut seen = HashSet::new();
        let root = build_group(config.group, &mut seen)?;
        Ok(Self {
            redundancy: config.redundancy,
            ready_copies: config.ready_copies,
            root,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: DistributionConfig = serde_json::from_str(json)?;
        Self::from_config(config)
    }

    /// All nodes in the root group.
    pub fn flat(redundancy: u32, node_count: u16) -> Self {
        Self {
            redundancy,
            ready_copies: redundancy,
            root: Group::leaf(0, "invalid", (0..node_count).collect()),
        }
    }

    /// `group_count` leaf groups of `nodes_per_group` nodes, numbered in order.
    pub fn with_groups(redundancy: u32, group_count: u16, nodes_per_group: u16) -> Self {
        let groups = (0..group_count)
            .map(|g| {
                let first = g * nodes_per_group;
                Group::leaf(g, format!("group{}", g), (first..first + nodes_per_group).collect())
            })
            .collect();
        Self {
            redundancy,
            ready_copies: redundancy,
            root: Group::inner(0, "invalid", groups),
        }
    }

    pub fn redundancy(&self) -> u32 {
        self.redundancy
    }

    pub fn ready_copies(&self) -> u32 {
        self.ready_copies
    }

    pub fn root(&self) -> &Group {
        &self.root
    }
}

impl GroupTopology for Distribution {
    fn is_hierarchical(&self) -> bool {
        !self.root.is_leaf()
    }

    fn leaf_groups(&self) -> Vec<&Group> {
        let mut leaves = Vec::new();
        if self.is_hierarchical() {
            self.root.collect_leaves(&mut leaves);
        }
        leaves
    }
}

fn build_group(config: GroupConfig, seen: &mut HashSet<u16>) -> Result<Group> {
    if config.groups.is_empty() {
        if config.nodes.is_empty() {
            return Err(FleetGateError::InvalidTopology(format!(
                "leaf group '{}' has no nodes",
                config.name
            )));
        }
        for &node in &config.nodes {
            if !seen.insert(node) {
                return Err(FleetGateError::InvalidTopology(format!(
                    "node {} appears in more than one group",
                    node
                )));
            }
        }
        return Ok(Group::leaf(config.index, config.name, config.nodes));
    }

    if !config.nodes.is_empty() {
        return Err(FleetGateError::InvalidTopology(format!(
            "group '{}' has subgroups and cannot also hold nodes",
            config.name
        )));
    }

    let mut indices = HashSet::new();
    let mut subgroups = Vec::with_capacity(config.groups.len());
    for child in config.groups {
        if !indices.insert(child.index) {
            return Err(FleetGateError::InvalidTopology(format!(
                "duplicate group index {} under '{}'",
                child.index, config.name
            )));
        }
        subgroups.push(build_group(child, seen)?);
    }
    Ok(Group::inner(config.index, config.name, subgroups))
}

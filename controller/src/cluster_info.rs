//! Registry of observed and wanted node state for one content cluster.
//!
//! The heartbeat pipeline mutates the registry continuously. Readers take an
//! immutable [`ClusterInfoSnapshot`] and work on that, so a decision never
//! sees a half-applied update.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use fleetgate_common::{
    ConfiguredNode, FleetGateError, HostInfo, Node, NodeState, NodeType, Result,
};

/// Everything known about a single storage node or distributor.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: Node,
    reported_state: NodeState,
    reported_at: Option<DateTime<Utc>>,
    wanted_state: NodeState,
    host_info: HostInfo,
}

impl NodeInfo {
    /// A node that has not reported yet: reported Down, wanted Up.
    pub fn new(node: Node) -> Self {
        Self {
            node,
            reported_state: NodeState::down(),
            reported_at: None,
            wanted_state: NodeState::up(),
            host_info: HostInfo::default(),
        }
    }

    pub fn node(&self) -> Node {
        self.node
    }

    pub fn node_index(&self) -> u16 {
        self.node.index()
    }

    /// State from the node's latest heartbeat.
    pub fn reported_state(&self) -> &NodeState {
        &self.reported_state
    }

    /// When the reported state was last updated.
    pub fn reported_at(&self) -> Option<DateTime<Utc>> {
        self.reported_at
    }

    /// Wanted state set by an operator or automation.
    pub fn user_wanted_state(&self) -> &NodeState {
        &self.wanted_state
    }

    pub fn host_info(&self) -> &HostInfo {
        &self.host_info
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfoSnapshot {
    configured_nodes: BTreeMap<u16, ConfiguredNode>,
    storage_nodes: BTreeMap<u16, NodeInfo>,
    distributors: BTreeMap<u16, NodeInfo>,
}

impl ClusterInfoSnapshot {
    pub fn storage_node_info(&self, index: u16) -> Option<&NodeInfo> {
        self.storage_nodes.get(&index)
    }

    pub fn distributor_node_info(&self, index: u16) -> Option<&NodeInfo> {
        self.distributors.get(&index)
    }

    pub fn node_info(&self, node: &Node) -> Option<&NodeInfo> {
        match node.node_type() {
            NodeType::Storage => self.storage_node_info(node.index()),
            NodeType::Distributor => self.distributor_node_info(node.index()),
        }
    }

    /// Storage nodes in ascending index order.
    pub fn storage_node_infos(&self) -> impl Iterator<Item = &NodeInfo> {
        self.storage_nodes.values()
    }

    /// Distributors in ascending index order.
    pub fn distributor_node_infos(&self) -> impl Iterator<Item = &NodeInfo> {
        self.distributors.values()
    }

    pub fn has_distributors(&self) -> bool {
        !self.distributors.is_empty()
    }

    /// Configured node indices in ascending order.
    pub fn configured_nodes(&self) -> impl Iterator<Item = &ConfiguredNode> {
        self.configured_nodes.values()
    }

    pub fn configured_node_count(&self) -> usize {
        self.configured_nodes.len()
    }

    fn entries_mut(&mut self, node_type: NodeType) -> &mut BTreeMap<u16, NodeInfo> {
        match node_type {
            NodeType::Storage => &mut self.storage_nodes,
            NodeType::Distributor => &mut self.distributors,
        }
    }

    fn node_info_mut(&mut self, node: &Node) -> Result<&mut NodeInfo> {
        self.entries_mut(node.node_type())
            .get_mut(&node.index())
            .ok_or(FleetGateError::UnknownNode(*node))
    }
}

/// Live registry for one content cluster.
pub struct ClusterInfo {
    cluster_name: String,
    current: RwLock<Arc<ClusterInfoSnapshot>>,
}

impl ClusterInfo {
    /// Registry with a storage node and a distributor entry for every
    /// configured index.
    pub fn new(cluster_name: impl Into<String>, nodes: impl IntoIterator<Item = ConfiguredNode>) -> Self {
        let registry = Self::unpopulated(cluster_name, nodes);
        registry.update(|snapshot| {
            let indices: Vec<u16> = snapshot.configured_nodes.keys().copied().collect();
            for index in indices {
                snapshot.storage_nodes.insert(index, NodeInfo::new(Node::storage(index)));
                snapshot.distributors.insert(index, NodeInfo::new(Node::distributor(index)));
            }
        });
        registry
    }

    /// Registry that knows the configured nodes but has no entries yet.
    /// Entries appear as nodes report in.
    pub fn unpopulated(cluster_name: impl Into<String>, nodes: impl IntoIterator<Item = ConfiguredNode>) -> Self {
        let configured_nodes = nodes.into_iter().map(|node| (node.index, node)).collect();
        Self {
            cluster_name: cluster_name.into(),
            current: RwLock::new(Arc::new(ClusterInfoSnapshot {
                configured_nodes,
                ..ClusterInfoSnapshot::default()
            })),
        }
    }

    /// Current view of the registry.
    pub fn snapshot(&self) -> Arc<ClusterInfoSnapshot> {
        self.current.read().clone()
    }

    /// Replace the set of configured nodes. Entries for nodes that are no
    /// longer configured are dropped, new nodes get fresh entries.
    pub fn set_configured_nodes(&self, nodes: impl IntoIterator<Item = ConfiguredNode>) {
        let configured: BTreeMap<u16, ConfiguredNode> =
            nodes.into_iter().map(|node| (node.index, node)).collect();
        self.update(|snapshot| {
            snapshot.storage_nodes.retain(|index, _| configured.contains_key(index));
            snapshot.distributors.retain(|index, _| configured.contains_key(index));
            for &index in configured.keys() {
                snapshot
                    .storage_nodes
                    .entry(index)
                    .or_insert_with(|| NodeInfo::new(Node::storage(index)));
                snapshot
                    .distributors
                    .entry(index)
                    .or_insert_with(|| NodeInfo::new(Node::distributor(index)));
            }
            snapshot.configured_nodes = configured;
        });
        info!(cluster = %self.cluster_name, "Configured nodes updated");
    }

    /// Record a heartbeat. A configured node without an entry gets one.
    pub fn set_reported_state(&self, node: Node, state: NodeState) -> Result<()> {
        self.try_update(|snapshot| {
            if !snapshot.configured_nodes.contains_key(&node.index()) {
                return Err(FleetGateError::UnknownNode(node));
            }
            let info = snapshot
                .entries_mut(node.node_type())
                .entry(node.index())
                .or_insert_with(|| NodeInfo::new(node));
            info.reported_state = state;
            info.reported_at = Some(Utc::now());
            Ok(())
        })?;
        debug!(node = %node, "Reported state updated");
        Ok(())
    }

    pub fn set_wanted_state(&self, node: Node, state: NodeState) -> Result<()> {
        self.try_update(|snapshot| {
            snapshot.node_info_mut(&node)?.wanted_state = state.clone();
            Ok(())
        })?;
        info!(node = %node, wanted_state = %state, "Wanted state updated");
        Ok(())
    }

    pub fn set_host_info(&self, node: Node, host_info: HostInfo) -> Result<()> {
        self.try_update(|snapshot| {
            snapshot.node_info_mut(&node)?.host_info = host_info;
            Ok(())
        })?;
        debug!(node = %node, "Host info updated");
        Ok(())
    }

    /// Store a host info document. A document that does not decode is
    /// replaced by empty host info, so stale data is never kept.
    pub fn set_host_info_json(&self, node: Node, json: &str) -> Result<()> {
        let host_info = HostInfo::from_json(json).unwrap_or_else(|e| {
            warn!(node = %node, error = %e, "Discarding malformed host info");
            HostInfo::default()
        });
        self.set_host_info(node, host_info)
    }

    fn update<R>(&self, f: impl FnOnce(&mut ClusterInfoSnapshot) -> R) -> R {
        let mut current = self.current.write();
        f(Arc::make_mut(&mut current))
    }

    fn try_update(&self, f: impl FnOnce(&mut ClusterInfoSnapshot) -> Result<()>) -> Result<()> {
        self.update(f)
    }
}

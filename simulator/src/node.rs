//! Simulated content nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use fleetgate_common::{HostInfo, Metric, Node, NodeState, NodeType, State};
use fleetgate_controller::ClusterInfo;

/// Mutable status a node reports in its heartbeat.
#[derive(Debug, Clone)]
struct NodeStatus {
    reported: State,
    /// Buckets in the default bucket space. Storage nodes only.
    buckets: i64,
    /// Minimum replication factor seen per storage node. Distributors only.
    replication: BTreeMap<u16, Option<u32>>,
}

/// A simulated storage node or distributor.
#[derive(Clone)]
pub struct SimulatedNode {
    node: Node,
    status: Arc<RwLock<NodeStatus>>,
}

impl SimulatedNode {
    /// Storage node holding `buckets` buckets.
    pub fn storage(index: u16, buckets: i64) -> Self {
        Self::with_status(
            Node::storage(index),
            NodeStatus {
                reported: State::Up,
                buckets,
                replication: BTreeMap::new(),
            },
        )
    }

    /// Distributor seeing every storage node at the given replication.
    pub fn distributor(index: u16, storage_nodes: u16, replication: u32) -> Self {
        Self::with_status(
            Node::distributor(index),
            NodeStatus {
                reported: State::Up,
                buckets: 0,
                replication: (0..storage_nodes).map(|i| (i, Some(replication))).collect(),
            },
        )
    }

    fn with_status(node: Node, status: NodeStatus) -> Self {
        Self {
            node,
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub fn node(&self) -> Node {
        self.node
    }

    pub async fn set_reported(&self, state: State) {
        self.status.write().await.reported = state;
    }

    pub async fn set_buckets(&self, buckets: i64) {
        self.status.write().await.buckets = buckets;
    }

    pub async fn set_replication(&self, storage_index: u16, factor: Option<u32>) {
        self.status
            .write()
            .await
            .replication
            .insert(storage_index, factor);
    }

    /// Host info as the node would report it after applying `applied_version`.
    pub async fn host_info(&self, applied_version: u32) -> HostInfo {
        let status = self.status.read().await;
        let host_info = HostInfo::default().with_cluster_state_version(applied_version);
        match self.node.node_type() {
            NodeType::Storage => {
                host_info.with_metric(Metric::default_space_buckets(Some(status.buckets)))
            }
            NodeType::Distributor => status
                .replication
                .iter()
                .fold(host_info, |info, (&index, &factor)| info.with_storage_node(index, factor)),
        }
    }

    /// Report state and host info to the controller's registry.
    pub async fn heartbeat(&self, cluster_info: &ClusterInfo, applied_version: u32) -> anyhow::Result<()> {
        let reported = self.status.read().await.reported;
        cluster_info.set_reported_state(self.node, NodeState::new(reported))?;

        let json = self.host_info(applied_version).await.to_json()?;
        cluster_info.set_host_info_json(self.node, &json)?;
        Ok(())
    }
}

/// Node factory for creating a simulated cluster.
pub struct NodeFactory;

impl NodeFactory {
    /// A storage node and a distributor for each index.
    pub fn create_nodes(count: u16, buckets: i64, replication: u32) -> Vec<SimulatedNode> {
        (0..count)
            .flat_map(|i| {
                [
                    SimulatedNode::storage(i, buckets),
                    SimulatedNode::distributor(i, count, replication),
                ]
            })
            .collect()
    }
}

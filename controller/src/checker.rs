//! Safety gate for wanted-state changes.
//!
//! [`NodeStateChangeChecker`] decides whether an operator or orchestrator may
//! set a new wanted state on a storage node without putting data at risk. It
//! reads one registry snapshot per call and never mutates anything.

use std::sync::Arc;

use tracing::debug;

use fleetgate_common::{
    ClusterState, Node, NodeState, NodeType, State, BUCKETS_METRIC_DIMENSIONS,
    BUCKETS_METRIC_NAME,
};

use crate::cluster_info::{ClusterInfo, ClusterInfoSnapshot, NodeInfo};
use crate::config::CheckerConfig;
use crate::request::Condition;
use crate::result::TransitionResult;
use crate::topology::GroupTopology;

/// Outcome of a single precondition: `Err` carries the refusal reason.
type Check = Result<(), String>;

fn verdict(check: Check) -> TransitionResult {
    match check {
        Ok(()) => TransitionResult::MustSetWantedState,
        Err(reason) => TransitionResult::Disallowed(reason),
    }
}

fn role_label(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Storage => "storage node",
        NodeType::Distributor => "distributor",
    }
}

/// Decides whether a wanted-state transition is safe.
pub struct NodeStateChangeChecker {
    config: CheckerConfig,
    topology: Arc<dyn GroupTopology>,
    cluster_info: Arc<ClusterInfo>,
}

impl NodeStateChangeChecker {
    pub fn new(
        config: CheckerConfig,
        topology: Arc<dyn GroupTopology>,
        cluster_info: Arc<ClusterInfo>,
    ) -> Self {
        Self {
            config,
            topology,
            cluster_info,
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Evaluate moving `node` from `old_wanted` to `new_wanted` given the
    /// current generated cluster state.
    pub fn evaluate_transition(
        &self,
        node: &Node,
        cluster_state: &ClusterState,
        condition: &Condition,
        old_wanted: &NodeState,
        new_wanted: &NodeState,
    ) -> TransitionResult {
        let result = self.evaluate(node, cluster_state, condition, old_wanted, new_wanted);
        debug!(
            node = %node,
            condition = %condition,
            new_state = %new_wanted,
            cluster_state_version = cluster_state.version(),
            result = %result,
            "Evaluated wanted state transition"
        );
        result
    }

    fn evaluate(
        &self,
        node: &Node,
        cluster_state: &ClusterState,
        condition: &Condition,
        old_wanted: &NodeState,
        new_wanted: &NodeState,
    ) -> TransitionResult {
        if *condition == Condition::Force {
            return TransitionResult::MustSetWantedState;
        }

        if self.config.in_moratorium {
            return TransitionResult::disallowed(
                "Master cluster controller is bootstrapping and in moratorium",
            );
        }

        if *condition != Condition::Safe {
            return TransitionResult::disallowed(format!(
                "Condition not implemented: {}",
                condition.name()
            ));
        }

        if node.node_type() != NodeType::Storage {
            return TransitionResult::disallowed(format!(
                "Safe-set of node state is only supported for storage nodes! Requested node type: {}",
                node.node_type()
            ));
        }

        let snapshot = self.cluster_info.snapshot();
        let Some(node_info) = snapshot.storage_node_info(node.index()) else {
            return TransitionResult::disallowed(format!("Unknown node {}", node));
        };

        // Re-sending an applied request must keep getting the same answer,
        // even if it would no longer pass the checks below.
        if new_wanted.is_equivalent(old_wanted) {
            return TransitionResult::AlreadySet;
        }

        match new_wanted.state {
            State::Up => can_set_state_up(node_info, old_wanted),
            State::Maintenance => verdict(self.can_set_state_maintenance_temporarily(
                &snapshot,
                node_info,
                cluster_state,
                new_wanted.description(),
            )),
            State::Down => verdict(self.can_set_state_down_permanently(
                node_info,
                cluster_state,
                new_wanted.description(),
            )),
            _ => TransitionResult::disallowed(format!(
                "Destination node state unsupported in safe mode: {}",
                new_wanted
            )),
        }
    }

    fn can_set_state_maintenance_temporarily(
        &self,
        snapshot: &ClusterInfoSnapshot,
        node_info: &NodeInfo,
        cluster_state: &ClusterState,
        new_description: &str,
    ) -> Check {
        check_no_conflicting_wanted_state(node_info, new_description)?;
        self.check_no_other_group_has_wanted_state(snapshot, node_info.node_index())?;

        if cluster_state.node_state(&node_info.node()).state == State::Down {
            return Ok(());
        }

        if self.another_node_in_group_already_allowed(snapshot, node_info.node_index(), new_description) {
            return Ok(());
        }

        check_all_nodes_are_up(snapshot, cluster_state)?;
        self.check_distributors(snapshot, node_info.node_index(), cluster_state.version())
    }

    fn can_set_state_down_permanently(
        &self,
        node_info: &NodeInfo,
        cluster_state: &ClusterState,
        new_description: &str,
    ) -> Check {
        check_no_conflicting_wanted_state(node_info, new_description)?;

        let reported = node_info.reported_state().state;
        if reported != State::Up {
            return Err(format!(
                "Reported state ({}) is not UP, so no bucket data is available",
                reported
            ));
        }

        let generated = cluster_state.node_state(&node_info.node()).state;
        if generated != State::Retired {
            return Err(format!(
                "Only retired nodes are allowed to be set to DOWN in safe mode - is {}",
                generated
            ));
        }

        let host_info = node_info.host_info();
        let controller_version = cluster_state.version();
        let node_version = host_info.cluster_state_version();
        if node_version != Some(controller_version) {
            return Err(format!(
                "Cluster controller at version {} got info for storage node {} at a different version {}",
                controller_version,
                node_info.node_index(),
                node_version.map_or_else(|| "null".to_string(), |v| v.to_string())
            ));
        }

        let buckets = host_info
            .metrics()
            .value_at(BUCKETS_METRIC_NAME, BUCKETS_METRIC_DIMENSIONS)
            .and_then(|value| value.last());
        let Some(buckets) = buckets else {
            return Err(format!(
                "Missing last value of the {} metric for storage node {}",
                BUCKETS_METRIC_NAME,
                node_info.node_index()
            ));
        };
        if buckets > 0 {
            return Err(format!("The storage node manages {} buckets", buckets));
        }

        Ok(())
    }

    /// At most one leaf group (or one node, when flat) may be suspended.
    fn check_no_other_group_has_wanted_state(
        &self,
        snapshot: &ClusterInfoSnapshot,
        node_index: u16,
    ) -> Check {
        if self.topology.is_hierarchical() {
            let violation = self
                .topology
                .leaf_groups()
                .into_iter()
                .filter(|group| !group.contains_node(node_index))
                .find_map(|group| {
                    group.nodes().iter().find_map(|&index| {
                        suspended_role(snapshot, index).map(|(node, state)| {
                            format!(
                                "At most one group can have wanted state: Other {} {} in group {} has wanted state {}",
                                role_label(node.node_type()),
                                index,
                                group.index(),
                                state
                            )
                        })
                    })
                });
            return violation.map_or(Ok(()), Err);
        }

        let violation = snapshot
            .configured_nodes()
            .map(|configured| configured.index)
            .filter(|&index| index != node_index)
            .find_map(|index| {
                suspended_role(snapshot, index).map(|(node, state)| {
                    format!(
                        "At most one node can have a wanted state when #groups = 1: Other {} {} has wanted state {}",
                        role_label(node.node_type()),
                        index,
                        state
                    )
                })
            });
        violation.map_or(Ok(()), Err)
    }

    /// True when another storage node in the target's leaf group is already
    /// in maintenance under the same description.
    fn another_node_in_group_already_allowed(
        &self,
        snapshot: &ClusterInfoSnapshot,
        node_index: u16,
        new_description: &str,
    ) -> bool {
        let Some(group) = self.topology.leaf_group_of(node_index) else {
            return false;
        };
        group
            .nodes()
            .iter()
            .filter(|&&index| index != node_index)
            .filter_map(|&index| snapshot.storage_node_info(index))
            .map(NodeInfo::user_wanted_state)
            .any(|wanted| wanted.state == State::Maintenance && wanted.description == new_description)
    }

    fn check_distributors(
        &self,
        snapshot: &ClusterInfoSnapshot,
        node_index: u16,
        cluster_state_version: u32,
    ) -> Check {
        if !snapshot.has_distributors() {
            return Err("Not aware of any distributors, probably not safe to upgrade?".to_string());
        }

        let required = self.config.required_redundancy;
        for distributor in snapshot.distributor_node_infos() {
            let host_info = distributor.host_info();
            match host_info.cluster_state_version() {
                None => {
                    return Err(format!(
                        "Distributor node {} has not reported any cluster state version yet.",
                        distributor.node_index()
                    ))
                }
                Some(version) if version != cluster_state_version => {
                    return Err(format!(
                        "Distributor node {} does not report same version ({}) as fleetcontroller ({})",
                        distributor.node_index(),
                        version,
                        cluster_state_version
                    ))
                }
                Some(_) => {}
            }

            // A missing factor means the distributor has too few buckets to say.
            let min_replication = host_info
                .distributor()
                .storage_node(node_index)
                .and_then(|stats| stats.min_current_replication_factor);
            if let Some(factor) = min_replication {
                if factor < required {
                    return Err(format!(
                        "Distributor {} says storage node {} has buckets with redundancy as low as {}, but we require at least {}",
                        distributor.node_index(),
                        node_index,
                        factor,
                        required
                    ));
                }
            }
        }

        Ok(())
    }
}

fn can_set_state_up(node_info: &NodeInfo, old_wanted: &NodeState) -> TransitionResult {
    if old_wanted.state == State::Up {
        return TransitionResult::AlreadySet;
    }

    let reported = node_info.reported_state().state;
    if reported != State::Up {
        return TransitionResult::disallowed(format!(
            "Refuse to set wanted state to UP, since the reported state is not UP ({})",
            reported
        ));
    }

    TransitionResult::MustSetWantedState
}

/// Refuse to override a wanted state set by someone else.
fn check_no_conflicting_wanted_state(node_info: &NodeInfo, new_description: &str) -> Check {
    let current = node_info.user_wanted_state();
    if current.state != State::Up && current.description != new_description {
        return Err(format!(
            "A conflicting wanted state is already set: {}: {}",
            current.state, current.description
        ));
    }
    Ok(())
}

/// First role of the node at `index` whose wanted state is not Up. A node
/// without a storage entry is skipped entirely.
fn suspended_role(snapshot: &ClusterInfoSnapshot, index: u16) -> Option<(Node, State)> {
    let storage = snapshot.storage_node_info(index)?;
    let storage_wanted = storage.user_wanted_state().state;
    if storage_wanted != State::Up {
        return Some((storage.node(), storage_wanted));
    }

    let distributor = snapshot.distributor_node_info(index)?;
    let distributor_wanted = distributor.user_wanted_state().state;
    (distributor_wanted != State::Up).then(|| (distributor.node(), distributor_wanted))
}

/// Every storage node, then every distributor, must be Up or Retired both in
/// wanted and in generated state.
fn check_all_nodes_are_up(snapshot: &ClusterInfoSnapshot, cluster_state: &ClusterState) -> Check {
    for info in snapshot
        .storage_node_infos()
        .chain(snapshot.distributor_node_infos())
    {
        let label = role_label(info.node().node_type());

        let wanted = info.user_wanted_state().state;
        if !wanted.is_up_or_retired() {
            return Err(format!(
                "Another {} wants state {}: {}",
                label,
                wanted.upper(),
                info.node_index()
            ));
        }

        let generated = cluster_state.node_state(&info.node()).state;
        if !generated.is_up_or_retired() {
            return Err(format!(
                "Another {} has state {}: {}",
                label,
                generated.upper(),
                info.node_index()
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Distribution, FlatTopology};
    use fleetgate_common::{ConfiguredNode, HostInfo, Metric};
    use proptest::prelude::*;

    const REQUIRED_REDUNDANCY: u32 = 4;
    const CURRENT_VERSION: u32 = 2;

    fn storage_1() -> Node {
        Node::storage(1)
    }

    fn maintenance() -> NodeState {
        NodeState::with_description(State::Maintenance, "Orchestrator")
    }

    fn retire_down() -> NodeState {
        NodeState::with_description(State::Down, "RetireEarlyExpirer")
    }

    fn cluster_state(s: &str) -> ClusterState {
        s.parse().unwrap()
    }

    fn default_all_up() -> ClusterState {
        cluster_state("version:2 distributor:4 storage:4")
    }

    fn create_cluster(count: u16) -> Arc<ClusterInfo> {
        Arc::new(ClusterInfo::new(
            "Clustername",
            (0..count).map(|i| ConfiguredNode::new(i, false)),
        ))
    }

    fn checker(cluster: &Arc<ClusterInfo>) -> NodeStateChangeChecker {
        NodeStateChangeChecker::new(
            CheckerConfig::new(REQUIRED_REDUNDANCY),
            Arc::new(FlatTopology),
            cluster.clone(),
        )
    }

    /// Nodes 0-1 in group 0, nodes 2-3 in group 1.
    fn grouped_checker(cluster: &Arc<ClusterInfo>) -> NodeStateChangeChecker {
        NodeStateChangeChecker::new(
            CheckerConfig::new(REQUIRED_REDUNDANCY),
            Arc::new(Distribution::with_groups(2, 2, 2)),
            cluster.clone(),
        )
    }

    fn distributor_host_info(r0: u32, r1: u32, r2: u32) -> HostInfo {
        HostInfo::default()
            .with_cluster_state_version(CURRENT_VERSION)
            .with_storage_node(0, Some(r0))
            .with_storage_node(1, Some(r1))
            .with_storage_node(2, Some(r2))
            .with_storage_node(3, None)
    }

    fn set_all_nodes_up(cluster: &ClusterInfo, distributor_host_info: HostInfo) {
        let count = cluster.snapshot().configured_node_count() as u16;
        for i in 0..count {
            cluster.set_reported_state(Node::distributor(i), NodeState::up()).unwrap();
            cluster
                .set_host_info(Node::distributor(i), distributor_host_info.clone())
                .unwrap();
            cluster.set_reported_state(Node::storage(i), NodeState::up()).unwrap();
        }
    }

    fn host_info_with_buckets(version: u32, buckets: i64) -> HostInfo {
        HostInfo::default()
            .with_cluster_state_version(version)
            .with_metric(Metric::new("vds.datastored.alldisks.buckets", &[], Some(buckets)))
            .with_metric(Metric::new(BUCKETS_METRIC_NAME, &[("bucketSpace", "global")], Some(0)))
            .with_metric(Metric::default_space_buckets(Some(buckets)))
    }

    fn evaluate_down(state: ClusterState, reported: State, host_info: HostInfo) -> TransitionResult {
        let cluster = create_cluster(4);
        cluster.set_reported_state(storage_1(), NodeState::new(reported)).unwrap();
        cluster.set_host_info(storage_1(), host_info).unwrap();
        checker(&cluster).evaluate_transition(
            &storage_1(),
            &state,
            &Condition::Safe,
            &NodeState::up(),
            &retire_down(),
        )
    }

    fn retired_state() -> ClusterState {
        cluster_state("version:2 distributor:4 storage:4 .1.s:r")
    }

    fn to_maintenance(checker: &NodeStateChangeChecker, node: Node, state: &ClusterState) -> TransitionResult {
        checker.evaluate_transition(&node, state, &Condition::Safe, &NodeState::up(), &maintenance())
    }

    #[test]
    fn test_force_is_always_allowed() {
        let cluster = create_cluster(1);
        let result = checker(&cluster).evaluate_transition(
            &Node::distributor(1),
            &default_all_up(),
            &Condition::Force,
            &NodeState::up(),
            &NodeState::new(State::Initializing),
        );
        assert!(result.setting_wanted_state_is_allowed());
        assert!(!result.wanted_state_already_set());
    }

    #[test]
    fn test_denied_in_moratorium() {
        let cluster = create_cluster(4);
        let checker = NodeStateChangeChecker::new(
            CheckerConfig::new(REQUIRED_REDUNDANCY).in_moratorium(true),
            Arc::new(FlatTopology),
            cluster,
        );
        let result = to_maintenance(&checker, Node::storage(10), &default_all_up());
        assert_eq!(result.reason(), "Master cluster controller is bootstrapping and in moratorium");
        assert!(!result.wanted_state_already_set());
    }

    #[test]
    fn test_unimplemented_condition() {
        let cluster = create_cluster(4);
        let result = checker(&cluster).evaluate_transition(
            &storage_1(),
            &default_all_up(),
            &Condition::Other("careful".to_string()),
            &NodeState::up(),
            &maintenance(),
        );
        assert_eq!(result.reason(), "Condition not implemented: CAREFUL");
    }

    #[test]
    fn test_unknown_storage_node() {
        let cluster = create_cluster(4);
        let result = to_maintenance(&checker(&cluster), Node::storage(10), &default_all_up());
        assert!(result.is_disallowed());
        assert_eq!(result.reason(), "Unknown node storage.10");
    }

    #[test]
    fn test_safe_set_of_distributor_is_refused() {
        let cluster = create_cluster(1);
        let result = to_maintenance(&checker(&cluster), Node::distributor(1), &default_all_up());
        assert!(result.is_disallowed());
        assert_eq!(
            result.reason(),
            "Safe-set of node state is only supported for storage nodes! Requested node type: distributor"
        );
    }

    #[test]
    fn test_unsupported_destination_state() {
        let cluster = create_cluster(4);
        let result = checker(&cluster).evaluate_transition(
            &storage_1(),
            &default_all_up(),
            &Condition::Safe,
            &NodeState::up(),
            &NodeState::new(State::Retired),
        );
        assert_eq!(result.reason(), "Destination node state unsupported in safe mode: Retired");
    }

    #[test]
    fn test_maintenance_refused_when_other_storage_node_in_flat_cluster_is_suspended() {
        let cluster = create_cluster(4);
        cluster.set_wanted_state(Node::storage(0), maintenance()).unwrap();
        let state = cluster_state("version:2 distributor:4 storage:4 .0.s:m");

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert!(!result.wanted_state_already_set());
        assert_eq!(
            result.reason(),
            "At most one node can have a wanted state when #groups = 1: Other storage node 0 has wanted state Maintenance"
        );
    }

    #[test]
    fn test_maintenance_refused_when_other_distributor_in_flat_cluster_is_suspended() {
        let cluster = create_cluster(4);
        cluster
            .set_wanted_state(Node::distributor(0), NodeState::with_description(State::Down, "Orchestrator"))
            .unwrap();
        let state = cluster_state("version:2 distributor:4 .0.s:d storage:4");

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert_eq!(
            result.reason(),
            "At most one node can have a wanted state when #groups = 1: Other distributor 0 has wanted state Down"
        );
    }

    #[test]
    fn test_maintenance_refused_when_distributor_in_other_group_is_down() {
        let cluster = create_cluster(4);
        cluster
            .set_wanted_state(Node::distributor(0), NodeState::with_description(State::Down, "Orchestrator"))
            .unwrap();
        let checker = grouped_checker(&cluster);
        let state = cluster_state("version:2 distributor:4 .0.s:d storage:4");

        let result = to_maintenance(&checker, Node::storage(2), &state);
        assert_eq!(
            result.reason(),
            "At most one group can have wanted state: Other distributor 0 in group 0 has wanted state Down"
        );

        // Storage node 0 is not suspended, so node 1 gets no co-scheduling pass.
        let result = to_maintenance(&checker, storage_1(), &state);
        assert!(result.is_disallowed());
        assert_eq!(result.reason(), "Another distributor wants state DOWN: 0");
    }

    #[test]
    fn test_maintenance_within_already_suspended_group() {
        let cluster = create_cluster(4);
        cluster.set_wanted_state(Node::storage(0), maintenance()).unwrap();
        let checker = grouped_checker(&cluster);
        let state = cluster_state("version:2 distributor:4 storage:4 .0.s:m");

        let result = to_maintenance(&checker, Node::storage(2), &state);
        assert_eq!(
            result.reason(),
            "At most one group can have wanted state: Other storage node 0 in group 0 has wanted state Maintenance"
        );

        let result = to_maintenance(&checker, storage_1(), &state);
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
        assert!(!result.wanted_state_already_set());
    }

    #[test]
    fn test_co_scheduling_requires_same_description() {
        let cluster = create_cluster(4);
        cluster
            .set_wanted_state(Node::storage(0), NodeState::with_description(State::Maintenance, "operator"))
            .unwrap();
        let state = cluster_state("version:2 distributor:4 storage:4 .0.s:m");

        let result = to_maintenance(&grouped_checker(&cluster), storage_1(), &state);
        assert_eq!(result.reason(), "Another storage node wants state MAINTENANCE: 0");
    }

    #[test]
    fn test_group_check_skips_nodes_missing_from_registry() {
        let cluster = Arc::new(ClusterInfo::unpopulated(
            "Clustername",
            (0..4).map(|i| ConfiguredNode::new(i, false)),
        ));
        cluster.set_reported_state(Node::storage(2), NodeState::up()).unwrap();
        cluster.set_reported_state(Node::storage(1), NodeState::up()).unwrap();
        cluster.set_wanted_state(Node::storage(2), maintenance()).unwrap();
        let state = cluster_state("version:2 distributor:4 storage:4 .1.s:d");

        // Storage node 2 is present without its distributor; node 0 is absent.
        let result = to_maintenance(&grouped_checker(&cluster), storage_1(), &state);
        assert_eq!(
            result.reason(),
            "At most one group can have wanted state: Other storage node 2 in group 1 has wanted state Maintenance"
        );

        cluster.set_wanted_state(Node::storage(2), NodeState::up()).unwrap();
        let result = to_maintenance(&grouped_checker(&cluster), storage_1(), &state);
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
    }

    #[test]
    fn test_maintenance_refused_when_other_storage_is_missing() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        cluster.set_reported_state(Node::storage(3), NodeState::down()).unwrap();
        let state = cluster_state("version:2 distributor:4 storage:4 .3.s:d");

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert!(!result.wanted_state_already_set());
        assert_eq!(result.reason(), "Another storage node has state DOWN: 3");
    }

    #[test]
    fn test_maintenance_allowed_when_all_up() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
        assert!(!result.wanted_state_already_set());
    }

    #[test]
    fn test_maintenance_allowed_when_target_is_down() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        cluster.set_reported_state(storage_1(), NodeState::down()).unwrap();
        let mut state = default_all_up();
        state.set_node_state(storage_1(), NodeState::down()).unwrap();

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
    }

    #[test]
    fn test_maintenance_refused_when_other_storage_is_down() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        cluster.set_reported_state(Node::storage(2), NodeState::down()).unwrap();
        let mut state = default_all_up();
        state.set_node_state(Node::storage(2), NodeState::down()).unwrap();

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert!(result.reason().contains("Another storage node has state DOWN: 2"));
    }

    #[test]
    fn test_generated_state_counts_even_when_reported_up() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        let state = cluster_state("version:2 distributor:4 storage:4 .3.s:d");

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert!(result.is_disallowed());
    }

    #[test]
    fn test_retired_nodes_do_not_block_maintenance() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        let state = cluster_state("version:2 distributor:4 storage:4 .2.s:r");

        let result = to_maintenance(&checker(&cluster), storage_1(), &state);
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
    }

    #[test]
    fn test_maintenance_refused_on_low_redundancy() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 3, 6));

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert!(!result.wanted_state_already_set());
        assert_eq!(
            result.reason(),
            "Distributor 0 says storage node 1 has buckets with redundancy as low as 3, but we require at least 4"
        );
    }

    #[test]
    fn test_maintenance_allowed_without_min_replication_factor() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 3, 6));

        let result = to_maintenance(&checker(&cluster), Node::storage(3), &default_all_up());
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
    }

    #[test]
    fn test_maintenance_allowed_when_distributors_do_not_mention_node() {
        let cluster = create_cluster(4);
        let json = r#"{
            "cluster-state-version": 2,
            "distributor": {
                "storage-nodes": [
                    { "node-index": 0, "min-current-replication-factor": 4 }
                ]
            }
        }"#;
        set_all_nodes_up(&cluster, HostInfo::from_json(json).unwrap());

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
    }

    #[test]
    fn test_distributor_without_version() {
        let cluster = create_cluster(4);
        cluster.set_reported_state(storage_1(), NodeState::up()).unwrap();

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert_eq!(result.reason(), "Distributor node 0 has not reported any cluster state version yet.");
    }

    #[test]
    fn test_distributor_at_other_version() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        cluster
            .set_host_info(Node::distributor(2), distributor_host_info(4, 5, 6).with_cluster_state_version(1))
            .unwrap();

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert_eq!(
            result.reason(),
            "Distributor node 2 does not report same version (1) as fleetcontroller (2)"
        );
    }

    #[test]
    fn test_no_known_distributors() {
        let cluster = Arc::new(ClusterInfo::unpopulated(
            "Clustername",
            (0..4).map(|i| ConfiguredNode::new(i, false)),
        ));
        cluster.set_reported_state(storage_1(), NodeState::up()).unwrap();

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert_eq!(result.reason(), "Not aware of any distributors, probably not safe to upgrade?");
    }

    #[test]
    fn test_conflicting_wanted_state() {
        let cluster = create_cluster(4);
        cluster
            .set_wanted_state(storage_1(), NodeState::with_description(State::Maintenance, "operator"))
            .unwrap();

        let result = to_maintenance(&checker(&cluster), storage_1(), &default_all_up());
        assert_eq!(result.reason(), "A conflicting wanted state is already set: Maintenance: operator");

        let result = checker(&cluster).evaluate_transition(
            &storage_1(),
            &retired_state(),
            &Condition::Safe,
            &NodeState::up(),
            &retire_down(),
        );
        assert_eq!(result.reason(), "A conflicting wanted state is already set: Maintenance: operator");
    }

    #[test]
    fn test_set_up_fails_if_reported_is_down() {
        let cluster = create_cluster(4);
        let result = checker(&cluster).evaluate_transition(
            &storage_1(),
            &default_all_up(),
            &Condition::Safe,
            &maintenance(),
            &NodeState::up(),
        );
        assert!(!result.wanted_state_already_set());
        assert_eq!(
            result.reason(),
            "Refuse to set wanted state to UP, since the reported state is not UP (Down)"
        );
    }

    #[test]
    fn test_set_up_succeeds_if_reported_up_but_generated_down() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        let state = cluster_state("version:2 distributor:4 storage:4 .1.s:d");

        let result = checker(&cluster).evaluate_transition(
            &storage_1(),
            &state,
            &Condition::Safe,
            &maintenance(),
            &NodeState::up(),
        );
        assert!(result.setting_wanted_state_is_allowed());
    }

    #[test]
    fn test_set_up_even_if_old_wanted_state_is_down() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 3, 6));

        let result = checker(&cluster).evaluate_transition(
            &storage_1(),
            &default_all_up(),
            &Condition::Safe,
            &NodeState::down(),
            &NodeState::up(),
        );
        assert!(result.setting_wanted_state_is_allowed());
    }

    fn transition_to_same_state(state: State, old_description: &str, new_description: &str) -> TransitionResult {
        let cluster = create_cluster(4);
        checker(&cluster).evaluate_transition(
            &storage_1(),
            &default_all_up(),
            &Condition::Safe,
            &NodeState::with_description(state, old_description),
            &NodeState::with_description(state, new_description),
        )
    }

    #[test]
    fn test_setting_up_when_up_is_already_set() {
        assert!(transition_to_same_state(State::Up, "foo", "bar").wanted_state_already_set());
    }

    #[test]
    fn test_setting_already_set_state() {
        let result = transition_to_same_state(State::Maintenance, "foo", "foo");
        assert!(!result.setting_wanted_state_is_allowed());
        assert!(result.wanted_state_already_set());
    }

    #[test]
    fn test_different_description_is_not_already_set() {
        let result = transition_to_same_state(State::Maintenance, "foo", "bar");
        assert!(!result.setting_wanted_state_is_allowed());
        assert!(!result.wanted_state_already_set());
    }

    #[test]
    fn test_down_refused_for_non_retired_node() {
        let result = evaluate_down(default_all_up(), State::Up, host_info_with_buckets(CURRENT_VERSION, 0));
        assert_eq!(result.reason(), "Only retired nodes are allowed to be set to DOWN in safe mode - is Up");
    }

    #[test]
    fn test_down_refused_while_node_has_buckets() {
        let result = evaluate_down(retired_state(), State::Up, host_info_with_buckets(CURRENT_VERSION, 1));
        assert!(!result.wanted_state_already_set());
        assert_eq!(result.reason(), "The storage node manages 1 buckets");
    }

    #[test]
    fn test_down_refused_by_reported_state() {
        let result = evaluate_down(retired_state(), State::Initializing, host_info_with_buckets(CURRENT_VERSION, 0));
        assert_eq!(
            result.reason(),
            "Reported state (Initializing) is not UP, so no bucket data is available"
        );
    }

    #[test]
    fn test_down_refused_on_version_mismatch() {
        let result = evaluate_down(retired_state(), State::Up, host_info_with_buckets(CURRENT_VERSION - 1, 0));
        assert_eq!(
            result.reason(),
            "Cluster controller at version 2 got info for storage node 1 at a different version 1"
        );

        let result = evaluate_down(retired_state(), State::Up, HostInfo::default());
        assert_eq!(
            result.reason(),
            "Cluster controller at version 2 got info for storage node 1 at a different version null"
        );
    }

    #[test]
    fn test_down_refused_without_bucket_metric() {
        let host_info = HostInfo::default()
            .with_cluster_state_version(CURRENT_VERSION)
            .with_metric(Metric::new(BUCKETS_METRIC_NAME, &[("bucketSpace", "global")], Some(0)))
            .with_metric(Metric::default_space_buckets(None));
        let result = evaluate_down(retired_state(), State::Up, host_info);
        assert_eq!(
            result.reason(),
            "Missing last value of the vds.datastored.bucket_space.buckets_total metric for storage node 1"
        );
    }

    #[test]
    fn test_down_allowed_for_empty_retired_node() {
        let result = evaluate_down(retired_state(), State::Up, host_info_with_buckets(CURRENT_VERSION, 0));
        assert!(result.setting_wanted_state_is_allowed(), "{}", result.reason());
        assert!(!result.wanted_state_already_set());
    }

    #[test]
    fn test_evaluation_uses_registry_snapshot_at_call_time() {
        let cluster = create_cluster(4);
        set_all_nodes_up(&cluster, distributor_host_info(4, 5, 6));
        let checker = checker(&cluster);

        assert!(to_maintenance(&checker, storage_1(), &default_all_up()).setting_wanted_state_is_allowed());

        cluster.set_wanted_state(Node::storage(3), maintenance()).unwrap();
        assert!(to_maintenance(&checker, storage_1(), &default_all_up()).is_disallowed());
    }

    fn any_state() -> impl Strategy<Value = State> {
        prop_oneof![
            Just(State::Up),
            Just(State::Down),
            Just(State::Maintenance),
            Just(State::Retired),
            Just(State::Initializing),
            Just(State::Stopping),
        ]
    }

    fn any_node_state() -> impl Strategy<Value = NodeState> {
        (any_state(), "[a-z]{0,3}").prop_map(|(state, description)| NodeState::with_description(state, description))
    }

    fn any_node() -> impl Strategy<Value = Node> {
        (any::<bool>(), 0u16..8).prop_map(|(storage, index)| {
            if storage {
                Node::storage(index)
            } else {
                Node::distributor(index)
            }
        })
    }

    proptest! {
        #[test]
        fn prop_force_is_always_allowed(
            node in any_node(),
            old in any_node_state(),
            new in any_node_state(),
            moratorium in any::<bool>(),
        ) {
            let cluster = create_cluster(4);
            let checker = NodeStateChangeChecker::new(
                CheckerConfig::new(REQUIRED_REDUNDANCY).in_moratorium(moratorium),
                Arc::new(FlatTopology),
                cluster,
            );
            let result = checker.evaluate_transition(&node, &default_all_up(), &Condition::Force, &old, &new);
            prop_assert!(result.setting_wanted_state_is_allowed());
        }

        #[test]
        fn prop_same_state_is_already_set(index in 0u16..4, state in any_node_state()) {
            let cluster = create_cluster(4);
            let result = checker(&cluster).evaluate_transition(
                &Node::storage(index),
                &default_all_up(),
                &Condition::Safe,
                &state,
                &state.clone(),
            );
            prop_assert!(result.wanted_state_already_set());
        }

        #[test]
        fn prop_evaluation_is_deterministic(
            node in any_node(),
            old in any_node_state(),
            new in any_node_state(),
            suspended in 0u16..4,
        ) {
            let cluster = create_cluster(4);
            set_all_nodes_up(&cluster, distributor_host_info(4, 3, 6));
            cluster.set_wanted_state(Node::storage(suspended), maintenance()).unwrap();
            let checker = grouped_checker(&cluster);
            let state = retired_state();

            let first = checker.evaluate_transition(&node, &state, &Condition::Safe, &old, &new);
            let second = checker.evaluate_transition(&node, &state, &Condition::Safe, &old, &new);
            prop_assert_eq!(first.to_string(), second.to_string());
        }
    }
}

//! Cluster controller facade.
//!
//! Owns the registry, topology and latest published cluster state for one
//! content cluster, and applies set-node-state requests that pass the
//! transition checker.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use fleetgate_common::{ClusterState, ConfiguredNode, FleetGateError, Node, NodeState, Result};

use crate::checker::NodeStateChangeChecker;
use crate::cluster_info::ClusterInfo;
use crate::config::ControllerConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::request::{Condition, SetNodeStateRequest, SetResponse};
use crate::result::TransitionResult;
use crate::state::ControllerState;
use crate::topology::GroupTopology;

/// Controller for a single content cluster.
pub struct ClusterController {
    /// Configuration.
    config: ControllerConfig,
    /// Lifecycle state.
    state: Arc<RwLock<ControllerState>>,
    /// Observed and wanted node state.
    cluster_info: Arc<ClusterInfo>,
    /// Redundancy group layout.
    topology: Arc<dyn GroupTopology>,
    /// Latest published cluster state.
    cluster_state: RwLock<ClusterState>,
    /// Serialises evaluate-then-apply of wanted states.
    apply_lock: Mutex<()>,
    metrics: SharedMetrics,
}

impl ClusterController {
    /// Create a controller for the given configured nodes.
    pub fn new(
        config: ControllerConfig,
        nodes: impl IntoIterator<Item = ConfiguredNode>,
        topology: Arc<dyn GroupTopology>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(FleetGateError::ConfigurationError)?;

        let nodes: Vec<ConfiguredNode> = nodes.into_iter().collect();
        let node_count = nodes.iter().try_fold(0u16, |count, n| {
            n.index.checked_add(1).map(|end| count.max(end)).ok_or_else(|| {
                FleetGateError::InvalidNode(format!(
                    "node index {} exceeds the largest node count",
                    n.index
                ))
            })
        })?;
        let initial_state = if config.start_in_moratorium {
            ControllerState::Bootstrapping
        } else {
            ControllerState::Running
        };

        info!(
            cluster = %config.cluster_name,
            nodes = nodes.len(),
            hierarchical = topology.is_hierarchical(),
            "Creating cluster controller"
        );

        Ok(Self {
            cluster_info: Arc::new(ClusterInfo::new(config.cluster_name.clone(), nodes)),
            config,
            state: Arc::new(RwLock::new(initial_state)),
            topology,
            cluster_state: RwLock::new(ClusterState::new(0, node_count, node_count)),
            apply_lock: Mutex::new(()),
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Registry shared with the heartbeat pipeline.
    pub fn cluster_info(&self) -> &Arc<ClusterInfo> {
        &self.cluster_info
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Get the current controller state.
    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Leave the bootstrap moratorium.
    pub fn finish_bootstrap(&self) {
        let mut state = self.state.write();
        if *state == ControllerState::Bootstrapping {
            *state = ControllerState::Running;
            info!(cluster = %self.config.cluster_name, "Bootstrap finished, leaving moratorium");
        }
    }

    /// Stop accepting requests.
    pub fn stop(&self) {
        *self.state.write() = ControllerState::Stopped;
        info!(cluster = %self.config.cluster_name, "Cluster controller stopped");
    }

    /// Latest published cluster state.
    pub fn cluster_state(&self) -> ClusterState {
        self.cluster_state.read().clone()
    }

    /// Publish a new generated cluster state. Versions must increase.
    pub fn publish_cluster_state(&self, state: ClusterState) -> Result<()> {
        let mut current = self.cluster_state.write();
        if state.version() <= current.version() {
            return Err(FleetGateError::InvalidClusterState {
                token: format!("version:{}", state.version()),
                reason: format!("version must be above {}", current.version()),
            });
        }

        info!(
            cluster = %self.config.cluster_name,
            version = state.version(),
            state = %state,
            "Publishing cluster state"
        );
        if self.config.metrics_enabled {
            self.metrics.set_cluster_state_version(state.version());
        }
        *current = state;
        Ok(())
    }

    /// Checker reflecting the current lifecycle state.
    pub fn checker(&self) -> NodeStateChangeChecker {
        NodeStateChangeChecker::new(
            self.config.checker_config(self.state().in_moratorium()),
            self.topology.clone(),
            self.cluster_info.clone(),
        )
    }

    /// Evaluate a set-node-state request and apply it if allowed.
    #[instrument(skip(self, request), fields(node = %request.node, condition = %request.condition))]
    pub fn handle_set_node_state(&self, request: &SetNodeStateRequest) -> Result<SetResponse> {
        if !self.state().accepts_requests() {
            return Err(FleetGateError::ControllerUnavailable(format!(
                "controller for cluster {} is stopped",
                self.config.cluster_name
            )));
        }

        let _guard = self.apply_lock.lock();

        let old_wanted = self
            .cluster_info
            .snapshot()
            .node_info(&request.node)
            .map(|info| info.user_wanted_state().clone())
            .unwrap_or_default();
        let cluster_state = self.cluster_state();

        let result = self.checker().evaluate_transition(
            &request.node,
            &cluster_state,
            &request.condition,
            &old_wanted,
            &request.new_state,
        );

        if self.config.metrics_enabled {
            self.metrics.request_evaluated(&result);
            if request.condition == Condition::Force {
                self.metrics.request_forced();
            }
            if request.probe {
                self.metrics.request_probed();
            }
        }

        match &result {
            TransitionResult::MustSetWantedState => {
                if !request.probe {
                    self.cluster_info
                        .set_wanted_state(request.node, request.new_state.clone())?;
                    if self.config.metrics_enabled {
                        self.metrics.wanted_state_applied();
                    }
                    info!(
                        old_state = %old_wanted,
                        new_state = %request.new_state,
                        "Wanted state applied"
                    );
                }
                Ok(SetResponse::new(result.reason(), true))
            }
            TransitionResult::AlreadySet => Ok(SetResponse::new(result.reason(), false)),
            TransitionResult::Disallowed(reason) => {
                warn!(new_state = %request.new_state, reason = %reason, "Wanted state change refused");
                Ok(SetResponse::new(reason.as_str(), false))
            }
        }
    }

    /// Wanted state currently recorded for a node.
    pub fn wanted_state(&self, node: &Node) -> Option<NodeState> {
        self.cluster_info
            .snapshot()
            .node_info(node)
            .map(|info| info.user_wanted_state().clone())
    }
}

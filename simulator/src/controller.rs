//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use fleetgate_common::{ClusterState, ConfiguredNode, Node, NodeState, NodeType, State};
use fleetgate_controller::{
    ClusterController, ControllerConfig, Distribution, FlatTopology, GroupTopology,
    SetNodeStateRequest, SetResponse, TransitionResult,
};

use crate::metrics::SimulationMetrics;
use crate::node::{NodeFactory, SimulatedNode};
use crate::scenario::{Expect, NodeOverride, Scenario, ScenarioStep};

/// Outcome of a request as seen by the simulated orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Allowed,
    AlreadySet,
    Refused,
}

impl Outcome {
    fn of(response: &SetResponse) -> Self {
        if response.was_modified {
            Outcome::Allowed
        } else if response.reason == TransitionResult::AlreadySet.reason() {
            Outcome::AlreadySet
        } else {
            Outcome::Refused
        }
    }
}

impl Expect {
    fn matches(&self, response: &SetResponse) -> bool {
        match self {
            Expect::Allowed => Outcome::of(response) == Outcome::Allowed,
            Expect::AlreadySet => Outcome::of(response) == Outcome::AlreadySet,
            Expect::Refused { reason_contains } => {
                Outcome::of(response) == Outcome::Refused && response.reason.contains(reason_contains.as_str())
            }
        }
    }
}

/// Controls the simulation of one scenario.
pub struct SimulationController {
    /// Controller under test.
    controller: Arc<ClusterController>,
    /// Leaf groups as lists of node indices; one entry per node when flat.
    batches: Vec<Vec<u16>>,
    /// Number of node indices.
    node_count: u16,
    /// Simulation speed multiplier.
    speed: f64,
    /// Random number generator for heartbeat jitter.
    rng: Arc<RwLock<StdRng>>,
    /// Simulated nodes.
    nodes: Vec<SimulatedNode>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a simulated cluster for the scenario.
    pub fn new(scenario: &Scenario, speed: f64, seed: Option<u64>) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let topology: Arc<dyn GroupTopology> = match scenario.groups {
            Some(groups) if groups > 0 => {
                if scenario.nodes % groups != 0 {
                    bail!("Cannot split {} nodes into {} equal groups", scenario.nodes, groups);
                }
                Arc::new(Distribution::with_groups(
                    scenario.required_redundancy.max(1),
                    groups,
                    scenario.nodes / groups,
                ))
            }
            _ => Arc::new(FlatTopology),
        };
        let batches: Vec<Vec<u16>> = if topology.is_hierarchical() {
            topology
                .leaf_groups()
                .iter()
                .map(|group| group.nodes().to_vec())
                .collect()
        } else {
            (0..scenario.nodes).map(|i| vec![i]).collect()
        };

        let config = ControllerConfig {
            cluster_name: scenario.name.clone(),
            required_redundancy: scenario.required_redundancy,
            start_in_moratorium: true,
            ..ControllerConfig::from_env()
        };
        let controller = ClusterController::new(
            config,
            (0..scenario.nodes).map(|i| ConfiguredNode::new(i, false)),
            topology,
        )?;

        info!(
            scenario = %scenario.name,
            nodes = scenario.nodes,
            groups = batches.len(),
            "Initialized simulated cluster"
        );

        Ok(Self {
            controller: Arc::new(controller),
            batches,
            node_count: scenario.nodes,
            speed,
            rng: Arc::new(RwLock::new(rng)),
            nodes: NodeFactory::create_nodes(
                scenario.nodes,
                scenario.initial_buckets,
                scenario.required_redundancy,
            ),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        })
    }

    pub fn controller(&self) -> &Arc<ClusterController> {
        &self.controller
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        self.heartbeat_round().await?;
        for (number, step) in scenario.steps.iter().enumerate() {
            self.execute_step(step)
                .await
                .map_err(|e| anyhow!("{}: step {} failed: {}", scenario.name, number + 1, e))?;
            if step.changes_cluster() {
                self.heartbeat_round().await?;
            }
        }

        info!(scenario = %scenario.name, "Scenario completed");
        Ok(())
    }

    /// Every node reports once, concurrently, with random jitter.
    pub async fn heartbeat_round(&self) -> anyhow::Result<()> {
        let applied_version = self.controller.cluster_state().version();
        let max_jitter_ms = (20.0 / self.speed) as u64;

        let mut tasks = JoinSet::new();
        for node in self.nodes.iter().cloned() {
            let jitter = Duration::from_millis(self.rng.write().await.gen_range(0..=max_jitter_ms));
            let cluster_info = self.controller.cluster_info().clone();
            tasks.spawn(async move {
                tokio::time::sleep(jitter).await;
                node.heartbeat(&cluster_info, applied_version).await
            });
        }

        let mut delivered = 0;
        while let Some(joined) = tasks.join_next().await {
            joined??;
            delivered += 1;
        }

        debug!(delivered, applied_version, "Heartbeat round complete");
        self.metrics.write().await.record_heartbeats(delivered);
        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                info!("Waiting {} ms (adjusted: {})", millis, adjusted);
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::FinishBootstrap => {
                self.controller.finish_bootstrap();
            }
            ScenarioStep::PublishState { overrides } => {
                let overrides = overrides
                    .iter()
                    .map(parse_override)
                    .collect::<anyhow::Result<Vec<_>>>()?;
                self.publish(&overrides)?;
            }
            ScenarioStep::ReportState { node, state } => {
                let node: Node = node.parse()?;
                let state: State = state.parse()?;
                self.simulated(node)?.set_reported(state).await;
            }
            ScenarioStep::SetBuckets { storage, buckets } => {
                self.simulated(Node::storage(*storage))?
                    .set_buckets(*buckets)
                    .await;
            }
            ScenarioStep::SetReplication { storage, factor } => {
                for node in self.nodes_of_type(NodeType::Distributor) {
                    node.set_replication(*storage, *factor).await;
                }
            }
            ScenarioStep::Request {
                node,
                state,
                description,
                condition,
                expect,
            } => {
                let new_state = NodeState::with_description(state.parse()?, description.as_str());
                let request = SetNodeStateRequest::new(node.parse()?, new_state, condition.parse()?);
                self.request(&request, expect).await?;
            }
            ScenarioStep::RollingMaintenance { description } => {
                self.rolling_maintenance(description).await?;
            }
        }

        Ok(())
    }

    /// Suspend each batch of nodes, publish, then bring it back.
    async fn rolling_maintenance(&self, description: &str) -> anyhow::Result<()> {
        let maintenance = NodeState::with_description(State::Maintenance, description);

        for batch in &self.batches {
            info!(nodes = ?batch, "Suspending batch");
            for &index in batch {
                let request = SetNodeStateRequest::safe(Node::storage(index), maintenance.clone());
                self.request(&request, &Expect::Allowed).await?;
            }

            let suspended: Vec<(Node, State)> = batch
                .iter()
                .map(|&index| (Node::storage(index), State::Maintenance))
                .collect();
            self.publish(&suspended)?;
            self.heartbeat_round().await?;

            for &index in batch {
                let request = SetNodeStateRequest::safe(Node::storage(index), NodeState::up());
                self.request(&request, &Expect::Allowed).await?;
            }

            self.publish(&[])?;
            self.heartbeat_round().await?;
        }

        Ok(())
    }

    async fn request(&self, request: &SetNodeStateRequest, expect: &Expect) -> anyhow::Result<()> {
        let started = Instant::now();
        let response = self.controller.handle_set_node_state(request)?;
        let latency_us = started.elapsed().as_micros() as u64;

        let mut metrics = self.metrics.write().await;
        match Outcome::of(&response) {
            Outcome::Allowed => metrics.record_allowed(latency_us),
            Outcome::AlreadySet => metrics.record_already_set(latency_us),
            Outcome::Refused => metrics.record_refused(latency_us),
        }

        if !expect.matches(&response) {
            metrics.record_unexpected();
            warn!(
                node = %request.node,
                expected = ?expect,
                reason = %response.reason,
                "Unexpected outcome"
            );
            bail!(
                "{} -> {}: expected {:?}, got '{}'",
                request.node,
                request.new_state,
                expect,
                response.reason
            );
        }

        info!(
            node = %request.node,
            new_state = %request.new_state,
            reason = %response.reason,
            "Request answered as expected"
        );
        Ok(())
    }

    /// Publish the next cluster state version with the given overrides.
    fn publish(&self, overrides: &[(Node, State)]) -> anyhow::Result<()> {
        let version = self.controller.cluster_state().version() + 1;
        let mut state = ClusterState::new(version, self.node_count, self.node_count);
        for &(node, node_state) in overrides {
            state.set_node_state(node, NodeState::new(node_state))?;
        }
        self.controller.publish_cluster_state(state)?;
        Ok(())
    }

    fn simulated(&self, node: Node) -> anyhow::Result<&SimulatedNode> {
        self.nodes
            .iter()
            .find(|n| n.node() == node)
            .ok_or_else(|| anyhow!("No simulated node {}", node))
    }

    fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &SimulatedNode> {
        self.nodes
            .iter()
            .filter(move |n| n.node().node_type() == node_type)
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

fn parse_override(o: &NodeOverride) -> anyhow::Result<(Node, State)> {
    Ok((o.node.parse()?, o.state.parse()?))
}

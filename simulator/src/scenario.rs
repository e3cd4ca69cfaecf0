//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Number of node indices; each runs a storage node and a distributor.
    pub nodes: u16,
    /// Number of leaf groups. Flat when absent.
    #[serde(default)]
    pub groups: Option<u16>,
    /// Minimum replication required before suspending a node.
    pub required_redundancy: u32,
    /// Buckets initially held by every storage node.
    #[serde(default)]
    pub initial_buckets: i64,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Leave the bootstrap moratorium.
    FinishBootstrap,
    /// Publish the next cluster state version with the given overrides.
    PublishState { overrides: Vec<NodeOverride> },
    /// Make a node report a different state.
    ReportState { node: String, state: String },
    /// Change the bucket count a storage node reports.
    SetBuckets { storage: u16, buckets: i64 },
    /// Change the replication every distributor reports for a storage node.
    SetReplication { storage: u16, factor: Option<u32> },
    /// Send a set-node-state request and check the outcome.
    Request {
        node: String,
        state: String,
        #[serde(default)]
        description: String,
        condition: String,
        expect: Expect,
    },
    /// Take every group (or node, when flat) through maintenance in turn.
    RollingMaintenance { description: String },
}

impl ScenarioStep {
    /// Whether nodes must report again before the next step.
    pub fn changes_cluster(&self) -> bool {
        !matches!(self, ScenarioStep::Wait { .. } | ScenarioStep::Request { .. })
    }
}

/// Generated state override for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOverride {
    pub node: String,
    pub state: String,
}

/// Expected outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expect {
    Allowed,
    AlreadySet,
    Refused { reason_contains: String },
}

fn safe_request(node: &str, state: &str, description: &str, expect: Expect) -> ScenarioStep {
    ScenarioStep::Request {
        node: node.to_string(),
        state: state.to_string(),
        description: description.to_string(),
        condition: "safe".to_string(),
        expect,
    }
}

fn refused(reason: &str) -> Expect {
    Expect::Refused {
        reason_contains: reason.to_string(),
    }
}

fn publish(overrides: &[(&str, &str)]) -> ScenarioStep {
    ScenarioStep::PublishState {
        overrides: overrides
            .iter()
            .map(|(node, state)| NodeOverride {
                node: node.to_string(),
                state: state.to_string(),
            })
            .collect(),
    }
}

impl Scenario {
    /// Names of the built-in scenarios.
    pub const BUILTIN: &'static [&'static str] = &[
        "flat-rolling",
        "grouped-rolling",
        "retire-and-remove",
        "low-redundancy",
    ];

    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "flat-rolling" => Ok(Self::flat_rolling()),
            "grouped-rolling" => Ok(Self::grouped_rolling()),
            "retire-and-remove" => Ok(Self::retire_and_remove()),
            "low-redundancy" => Ok(Self::low_redundancy()),
            path if Path::new(path).is_file() => {
                let text = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&text)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Rolling upgrade of a flat cluster, one node at a time.
    fn flat_rolling() -> Self {
        Self {
            name: "flat-rolling".to_string(),
            description: "Suspend each node of a flat cluster in turn".to_string(),
            nodes: 4,
            groups: None,
            required_redundancy: 2,
            initial_buckets: 100,
            steps: vec![
                publish(&[]),
                safe_request("storage.0", "maintenance", "orchestrator", refused("moratorium")),
                ScenarioStep::FinishBootstrap,
                safe_request(
                    "distributor.0",
                    "maintenance",
                    "orchestrator",
                    refused("only supported for storage nodes"),
                ),
                ScenarioStep::RollingMaintenance {
                    description: "orchestrator".to_string(),
                },
                safe_request("storage.1", "maintenance", "orchestrator", Expect::Allowed),
                safe_request(
                    "storage.2",
                    "maintenance",
                    "orchestrator",
                    refused("At most one node can have a wanted state"),
                ),
                safe_request("storage.1", "maintenance", "orchestrator", Expect::AlreadySet),
                safe_request("storage.1", "up", "", Expect::Allowed),
            ],
        }
    }

    /// Rolling upgrade of a grouped cluster, one group at a time.
    fn grouped_rolling() -> Self {
        Self {
            name: "grouped-rolling".to_string(),
            description: "Suspend each leaf group of a two-group cluster in turn".to_string(),
            nodes: 6,
            groups: Some(2),
            required_redundancy: 2,
            initial_buckets: 100,
            steps: vec![
                publish(&[]),
                ScenarioStep::FinishBootstrap,
                ScenarioStep::RollingMaintenance {
                    description: "upgrade".to_string(),
                },
                safe_request("storage.0", "maintenance", "upgrade", Expect::Allowed),
                safe_request("storage.1", "maintenance", "upgrade", Expect::Allowed),
                safe_request(
                    "storage.3",
                    "maintenance",
                    "upgrade",
                    refused("At most one group can have wanted state"),
                ),
                safe_request(
                    "storage.2",
                    "maintenance",
                    "other-operator",
                    refused("Another storage node wants state MAINTENANCE: 0"),
                ),
                safe_request("storage.0", "up", "", Expect::Allowed),
                safe_request("storage.1", "up", "", Expect::Allowed),
            ],
        }
    }

    /// Drain a retired node and remove it.
    fn retire_and_remove() -> Self {
        Self {
            name: "retire-and-remove".to_string(),
            description: "Set a node down once it is retired and empty".to_string(),
            nodes: 4,
            groups: None,
            required_redundancy: 2,
            initial_buckets: 120,
            steps: vec![
                publish(&[]),
                ScenarioStep::FinishBootstrap,
                safe_request("storage.3", "down", "retire", refused("Only retired nodes")),
                publish(&[("storage.3", "retired")]),
                safe_request("storage.3", "down", "retire", refused("manages 120 buckets")),
                ScenarioStep::SetBuckets {
                    storage: 3,
                    buckets: 0,
                },
                safe_request("storage.3", "down", "retire", Expect::Allowed),
                safe_request("storage.3", "down", "retire", Expect::AlreadySet),
            ],
        }
    }

    /// Refuse suspension while replication is low or a peer is down.
    fn low_redundancy() -> Self {
        Self {
            name: "low-redundancy".to_string(),
            description: "Refuse maintenance when data would lose redundancy".to_string(),
            nodes: 4,
            groups: None,
            required_redundancy: 3,
            initial_buckets: 100,
            steps: vec![
                publish(&[]),
                ScenarioStep::FinishBootstrap,
                ScenarioStep::SetReplication {
                    storage: 1,
                    factor: Some(2),
                },
                safe_request(
                    "storage.1",
                    "maintenance",
                    "orchestrator",
                    refused("redundancy as low as 2, but we require at least 3"),
                ),
                safe_request("storage.2", "maintenance", "orchestrator", Expect::Allowed),
                safe_request("storage.2", "up", "", Expect::Allowed),
                ScenarioStep::SetReplication {
                    storage: 1,
                    factor: None,
                },
                safe_request("storage.1", "maintenance", "orchestrator", Expect::Allowed),
                safe_request("storage.1", "up", "", Expect::Allowed),
                ScenarioStep::ReportState {
                    node: "storage.2".to_string(),
                    state: "down".to_string(),
                },
                publish(&[("storage.2", "down")]),
                safe_request(
                    "storage.1",
                    "maintenance",
                    "orchestrator",
                    refused("Another storage node has state DOWN: 2"),
                ),
                safe_request("storage.2", "maintenance", "orchestrator", Expect::Allowed),
            ],
        }
    }
}

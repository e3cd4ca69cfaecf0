//! Versioned cluster-wide generated state.
//!
//! The textual form is a space-separated list of tokens:
//!
//! ```text
//! version:12 cluster:u distributor:4 .0.s:d storage:4 .1.s:r .1.m:draining\x20node
//! ```
//!
//! Per-node tokens (`.<index>.s:<state>`, `.<index>.m:<description>`) apply to
//! the most recently named node type. Nodes below a type's count default to Up,
//! nodes at or above it are Down.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{FleetGateError, Node, NodeState, NodeType, State};

const DEFAULT_DISTRIBUTION_BITS: u16 = 16;

/// Generated state for every node in a content cluster, at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    version: u32,
    cluster_state: State,
    distribution_bits: u16,
    distributor_count: u16,
    storage_count: u16,
    /// Only nodes whose state differs from the Up default.
    node_states: BTreeMap<Node, NodeState>,
}

impl ClusterState {
    /// An all-Up cluster state with the given node counts.
    pub fn new(version: u32, distributor_count: u16, storage_count: u16) -> Self {
        Self {
            version,
            cluster_state: State::Up,
            distribution_bits: DEFAULT_DISTRIBUTION_BITS,
            distributor_count,
            storage_count,
            node_states: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of node slots of the given type.
    pub fn node_count(&self, node_type: NodeType) -> u16 {
        match node_type {
            NodeType::Distributor => self.distributor_count,
            NodeType::Storage => self.storage_count,
        }
    }

    /// Generated state of a node. Nodes outside the configured count are Down.
    pub fn node_state(&self, node: &Node) -> NodeState {
        if node.index() >= self.node_count(node.node_type()) {
            return NodeState::down();
        }
        self.node_states
            .get(node)
            .cloned()
            .unwrap_or_else(NodeState::up)
    }

    /// Override the generated state of a node.
    ///
    /// Setting a node beyond the current count grows the count; the slots in
    /// between become Down. The last index (`u16::MAX`) has no room for a
    /// count and is rejected.
    pub fn set_node_state(&mut self, node: Node, state: NodeState) -> Result<(), FleetGateError> {
        let count = self.node_count(node.node_type());
        if node.index() >= count {
            let grown = node.index().checked_add(1).ok_or_else(|| {
                FleetGateError::InvalidNode(format!("{} exceeds the largest node count", node))
            })?;
            for index in count..node.index() {
                self.node_states
                    .insert(Node::new(node.node_type(), index), NodeState::down());
            }
            self.set_node_count(node.node_type(), grown);
        }

        if state == NodeState::up() {
            self.node_states.remove(&node);
        } else {
            self.node_states.insert(node, state);
        }
        Ok(())
    }

    fn set_node_count(&mut self, node_type: NodeType, count: u16) {
        match node_type {
            NodeType::Distributor => self.distributor_count = count,
            NodeType::Storage => self.storage_count = count,
        }
    }

    fn write_nodes(&self, f: &mut fmt::Formatter<'_>, node_type: NodeType) -> fmt::Result {
        let count = self.node_count(node_type);
        if count == 0 {
            return Ok(());
        }
        write!(f, " {}:{}", node_type, count)?;
        for (node, state) in self
            .node_states
            .range(Node::new(node_type, 0)..=Node::new(node_type, u16::MAX))
        {
            if node.index() >= count {
                continue;
            }
            if state.state != State::Up {
                write!(f, " .{}.s:{}", node.index(), state.state.serialized_char())?;
            }
            if !state.description.is_empty() {
                write!(f, " .{}.m:{}", node.index(), escape(&state.description))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version:{}", self.version)?;
        if self.cluster_state != State::Up {
            write!(f, " cluster:{}", self.cluster_state.serialized_char())?;
        }
        if self.distribution_bits != DEFAULT_DISTRIBUTION_BITS {
            write!(f, " bits:{}", self.distribution_bits)?;
        }
        self.write_nodes(f, NodeType::Distributor)?;
        self.write_nodes(f, NodeType::Storage)
    }
}

impl FromStr for ClusterState {
    type Err = FleetGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut state = ClusterState::new(0, 0, 0);
        let mut current_type: Option<NodeType> = None;

        for token in s.split_whitespace() {
            let (key, value) = token
                .split_once(':')
                .ok_or_else(|| FleetGateError::cluster_state(token, "expected key:value"))?;

            if let Some(node_key) = key.strip_prefix('.') {
                let node_type = current_type.ok_or_else(|| {
                    FleetGateError::cluster_state(token, "node attribute before any node type")
                })?;
                state.apply_node_attribute(token, node_type, node_key, value)?;
                continue;
            }

            match key {
                "version" => state.version = parse_number(token, value)?,
                "bits" => state.distribution_bits = parse_number(token, value)?,
                "cluster" => state.cluster_state = parse_state(token, value)?,
                "distributor" | "storage" => {
                    let node_type: NodeType = key.parse()?;
                    state.set_node_count(node_type, parse_number(token, value)?);
                    current_type = Some(node_type);
                }
                _ => return Err(FleetGateError::cluster_state(token, "unknown key")),
            }
        }

        Ok(state)
    }
}

impl ClusterState {
    fn apply_node_attribute(
        &mut self,
        token: &str,
        node_type: NodeType,
        node_key: &str,
        value: &str,
    ) -> Result<(), FleetGateError> {
        let (index, attribute) = node_key
            .split_once('.')
            .ok_or_else(|| FleetGateError::cluster_state(token, "expected .<index>.<attribute>"))?;
        let index: u16 = parse_number(token, index)?;
        if index >= self.node_count(node_type) {
            return Err(FleetGateError::cluster_state(token, "node index out of range"));
        }

        let node = Node::new(node_type, index);
        let mut node_state = self.node_state(&node);
        match attribute {
            "s" => node_state.state = parse_state(token, value)?,
            "m" => node_state.description = unescape(token, value)?,
            _ => return Err(FleetGateError::cluster_state(token, "unknown node attribute")),
        }
        self.set_node_state(node, node_state)
    }
}

fn parse_number<T: FromStr>(token: &str, value: &str) -> Result<T, FleetGateError> {
    value
        .parse()
        .map_err(|_| FleetGateError::cluster_state(token, "invalid number"))
}

fn parse_state(token: &str, value: &str) -> Result<State, FleetGateError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => State::from_serialized_char(c)
            .ok_or_else(|| FleetGateError::cluster_state(token, "unknown state character")),
        _ => Err(FleetGateError::cluster_state(token, "state must be a single character")),
    }
}

fn escape(description: &str) -> String {
    let mut out = String::with_capacity(description.len());
    for c in description.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            c if c.is_whitespace() || c == ':' => {
                for unit in c.to_string().bytes() {
                    out.push_str(&format!("\\x{:02x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn unescape(token: &str, value: &str) -> Result<String, FleetGateError> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut rest = value.as_bytes();
    while let Some((&b, tail)) = rest.split_first() {
        if b != b'\\' {
            bytes.push(b);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', tail @ ..] => {
                bytes.push(b'\\');
                rest = tail;
            }
            [b'x', hi, lo, tail @ ..] => {
                let hex = [*hi, *lo];
                let decoded = std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| FleetGateError::cluster_state(token, "invalid escape"))?;
                bytes.push(decoded);
                rest = tail;
            }
            _ => return Err(FleetGateError::cluster_state(token, "invalid escape")),
        }
    }
    String::from_utf8(bytes).map_err(|_| FleetGateError::cluster_state(token, "invalid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_up() {
        let state: ClusterState = "version:2 distributor:4 storage:4".parse().unwrap();
        assert_eq!(state.version(), 2);
        assert_eq!(state.node_count(NodeType::Storage), 4);
        assert_eq!(state.node_state(&Node::storage(3)).state, State::Up);
        assert_eq!(state.node_state(&Node::distributor(0)).state, State::Up);
    }

    #[test]
    fn test_out_of_range_nodes_are_down() {
        let state: ClusterState = "version:2 distributor:4 storage:4".parse().unwrap();
        assert_eq!(state.node_state(&Node::storage(4)).state, State::Down);
        assert_eq!(state.node_state(&Node::storage(10)).state, State::Down);
    }

    #[test]
    fn test_node_overrides_apply_to_last_type() {
        let state: ClusterState = "version:2 distributor:4 .0.s:d storage:4 .1.s:r .3.s:m"
            .parse()
            .unwrap();
        assert_eq!(state.node_state(&Node::distributor(0)).state, State::Down);
        assert_eq!(state.node_state(&Node::storage(0)).state, State::Up);
        assert_eq!(state.node_state(&Node::storage(1)).state, State::Retired);
        assert_eq!(state.node_state(&Node::storage(3)).state, State::Maintenance);
    }

    #[test]
    fn test_description_escapes() {
        let state: ClusterState = r"version:1 storage:2 .1.s:m .1.m:rolling\x20upgrade"
            .parse()
            .unwrap();
        let node_state = state.node_state(&Node::storage(1));
        assert_eq!(node_state.description, "rolling upgrade");
        assert!(state.to_string().contains(r".1.m:rolling\x20upgrade"));
    }

    #[test]
    fn test_display_is_canonical() {
        let text = "version:7 cluster:d bits:8 distributor:2 .1.s:d storage:3 .0.s:r";
        let state: ClusterState = text.parse().unwrap();
        assert_eq!(state.to_string(), text);
        assert_eq!(state.to_string().parse::<ClusterState>().unwrap(), state);
    }

    #[test]
    fn test_set_node_state() {
        let mut state = ClusterState::new(3, 4, 4);
        state.set_node_state(Node::storage(1), NodeState::down()).unwrap();
        assert_eq!(state.to_string(), "version:3 distributor:4 storage:4 .1.s:d");

        state.set_node_state(Node::storage(1), NodeState::up()).unwrap();
        assert_eq!(state.to_string(), "version:3 distributor:4 storage:4");
    }

    #[test]
    fn test_set_node_state_beyond_count_grows() {
        let mut state = ClusterState::new(1, 1, 2);
        state.set_node_state(Node::storage(4), NodeState::new(State::Retired)).unwrap();
        assert_eq!(state.node_count(NodeType::Storage), 5);
        assert_eq!(state.node_state(&Node::storage(2)).state, State::Down);
        assert_eq!(state.node_state(&Node::storage(3)).state, State::Down);
        assert_eq!(state.node_state(&Node::storage(4)).state, State::Retired);
    }

    #[test]
    fn test_set_node_state_at_last_index_is_rejected() {
        let mut state = ClusterState::new(1, 2, 2);
        let err = state
            .set_node_state(Node::storage(u16::MAX), NodeState::down())
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_NODE");
        assert_eq!(state.node_count(NodeType::Storage), 2);
        assert_eq!(state.to_string(), "version:1 distributor:2 storage:2");
    }

    #[test]
    fn test_parse_errors() {
        assert!("version".parse::<ClusterState>().is_err());
        assert!("version:x".parse::<ClusterState>().is_err());
        assert!(".0.s:d".parse::<ClusterState>().is_err());
        assert!("storage:2 .2.s:d".parse::<ClusterState>().is_err());
        assert!("storage:2 .1.s:q".parse::<ClusterState>().is_err());
        assert!("storage:2 .1.z:q".parse::<ClusterState>().is_err());
        assert!("color:blue".parse::<ClusterState>().is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_never_panics(text in "[a-z.:0-9 \\\\]{0,40}") {
            let _ = text.parse::<ClusterState>();
        }

        #[test]
        fn prop_nodes_past_count_are_down(count in 0u16..50, extra in 0u16..50) {
            let state = ClusterState::new(1, count, count);
            let node = Node::storage(count + extra);
            proptest::prop_assert_eq!(state.node_state(&node).state, State::Down);
        }
    }
}

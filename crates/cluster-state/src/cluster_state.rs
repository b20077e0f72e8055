//! Versioned, immutable snapshot of node availability across the cluster
//!
//! The wire form is a whitespace separated list of `key:value` tokens, for
//! example `version:12 bits:16 distributor:3 .1.s:d storage:6 .2.s:m .4.t:1700000000`.
//! Nodes below a node type's count default to `up`; indices at or above the
//! count are `down`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{ClusterStateError, Node, NodeState, NodeType, State};

const DEFAULT_DISTRIBUTION_BITS: u16 = 16;

static DEFAULT_UP: NodeState = NodeState::new(State::Up);
static OUTSIDE_COUNT: NodeState = NodeState::new(State::Down);

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct NodeTypeStates {
    count: u16,
    states: BTreeMap<u16, NodeState>,
}

impl NodeTypeStates {
    fn get(&self, index: u16) -> &NodeState {
        if index >= self.count {
            return &OUTSIDE_COUNT;
        }
        self.states.get(&index).unwrap_or(&DEFAULT_UP)
    }

    fn set(&mut self, index: u16, state: NodeState) {
        // A count is a u16, so the last index can never be inside it
        let Some(count) = index.checked_add(1) else {
            return;
        };
        if index >= self.count {
            for missing in self.count..index {
                self.states.insert(missing, NodeState::new(State::Down));
            }
            self.count = count;
        }
        if state == DEFAULT_UP {
            self.states.remove(&index);
        } else {
            self.states.insert(index, state);
        }
    }

    fn normalize(&mut self) {
        self.states.retain(|_, state| *state != DEFAULT_UP);
    }
}

/// Cluster state snapshot
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterState {
    version: u32,
    cluster_state: State,
    distribution_bits: u16,
    distributors: NodeTypeStates,
    storage: NodeTypeStates,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            version: 0,
            cluster_state: State::Up,
            distribution_bits: DEFAULT_DISTRIBUTION_BITS,
            distributors: NodeTypeStates::default(),
            storage: NodeTypeStates::default(),
        }
    }
}

impl ClusterState {
    /// Create an empty cluster state with the given version
    #[must_use]
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Set the node count for a node type. All nodes below the count default to up.
    #[must_use]
    pub fn with_node_count(mut self, node_type: NodeType, count: u16) -> Self {
        let states = self.states_mut(node_type);
        states.count = count;
        states.states.retain(|index, _| *index < count);
        self
    }

    /// Set the state of a single node, growing the node count if needed.
    /// Nodes skipped over when growing the count are down. Index `u16::MAX`
    /// lies beyond any node count and is ignored.
    #[must_use]
    pub fn with_node_state(mut self, node: Node, state: NodeState) -> Self {
        self.states_mut(node.node_type).set(node.index, state);
        self
    }

    /// Set the global cluster state
    #[must_use]
    pub const fn with_cluster_state(mut self, state: State) -> Self {
        self.cluster_state = state;
        self
    }

    /// Set the number of distribution bits
    #[must_use]
    pub const fn with_distribution_bits(mut self, bits: u16) -> Self {
        self.distribution_bits = bits;
        self
    }

    /// Set the version
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Version of this state
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Global state of the cluster
    #[must_use]
    pub const fn cluster_state(&self) -> State {
        self.cluster_state
    }

    /// Number of distribution bits
    #[must_use]
    pub const fn distribution_bits(&self) -> u16 {
        self.distribution_bits
    }

    /// Number of nodes of the given type
    #[must_use]
    pub const fn node_count(&self, node_type: NodeType) -> u16 {
        self.states(node_type).count
    }

    /// State of a node. Nodes outside the node count are reported down.
    #[must_use]
    pub fn node_state(&self, node: Node) -> &NodeState {
        self.states(node.node_type).get(node.index)
    }

    /// Indices of every storage node covered by this state
    pub fn storage_nodes(&self) -> impl Iterator<Item = u16> + use<> {
        0..self.storage.count
    }

    const fn states(&self, node_type: NodeType) -> &NodeTypeStates {
        match node_type {
            NodeType::Distributor => &self.distributors,
            NodeType::Storage => &self.storage,
        }
    }

    const fn states_mut(&mut self, node_type: NodeType) -> &mut NodeTypeStates {
        match node_type {
            NodeType::Distributor => &mut self.distributors,
            NodeType::Storage => &mut self.storage,
        }
    }

    fn parse_node_token(
        &mut self,
        section: Option<NodeType>,
        token: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterStateError> {
        let node_type =
            section.ok_or_else(|| ClusterStateError::MissingNodeType(token.to_string()))?;
        let (index, attribute) = key
            .split_once('.')
            .ok_or_else(|| ClusterStateError::MalformedToken(token.to_string()))?;
        let index: u16 = parse_number(token, index)?;

        let states = self.states_mut(node_type);
        if index >= states.count {
            return Err(ClusterStateError::NodeOutsideRange {
                node_type,
                index,
                count: states.count,
            });
        }

        let entry = states.states.entry(index).or_default();
        match attribute {
            "s" => entry.state = value.parse()?,
            "m" => entry.description = unescape(value),
            "t" => entry.start_timestamp = parse_number(token, value)?,
            _ => return Err(ClusterStateError::UnknownKey(token.to_string())),
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ClusterStateError> {
    value.parse().map_err(|_| ClusterStateError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn escape(description: &str) -> String {
    description.replace('\\', "\\\\").replace(' ', "\\x20")
}

fn unescape(value: &str) -> String {
    value.replace("\\x20", " ").replace("\\\\", "\\")
}

impl FromStr for ClusterState {
    type Err = ClusterStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut state = Self::default();
        let mut section = None;

        for token in s.split_whitespace() {
            let (key, value) = token
                .split_once(':')
                .ok_or_else(|| ClusterStateError::MalformedToken(token.to_string()))?;

            if let Some(node_key) = key.strip_prefix('.') {
                state.parse_node_token(section, token, node_key, value)?;
                continue;
            }

            match key {
                "version" => state.version = parse_number(key, value)?,
                "cluster" => state.cluster_state = value.parse()?,
                "bits" => state.distribution_bits = parse_number(key, value)?,
                "distributor" => {
                    section = Some(NodeType::Distributor);
                    state.distributors.count = parse_number(key, value)?;
                }
                "storage" => {
                    section = Some(NodeType::Storage);
                    state.storage.count = parse_number(key, value)?;
                }
                _ => return Err(ClusterStateError::UnknownKey(key.to_string())),
            }
        }

        state.distributors.normalize();
        state.storage.normalize();
        Ok(state)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version:{}", self.version)?;
        if self.cluster_state != State::Up {
            write!(f, " cluster:{}", self.cluster_state.as_char())?;
        }
        if self.distribution_bits != DEFAULT_DISTRIBUTION_BITS {
            write!(f, " bits:{}", self.distribution_bits)?;
        }
        for node_type in [NodeType::Distributor, NodeType::Storage] {
            let states = self.states(node_type);
            if states.count == 0 {
                continue;
            }
            write!(f, " {node_type}:{}", states.count)?;
            for (index, node_state) in &states.states {
                if node_state.state != State::Up {
                    write!(f, " .{index}.s:{}", node_state.state.as_char())?;
                }
                if node_state.start_timestamp != 0 {
                    write!(f, " .{index}.t:{}", node_state.start_timestamp)?;
                }
                if !node_state.description.is_empty() {
                    write!(f, " .{index}.m:{}", escape(&node_state.description))?;
                }
            }
        }
        Ok(())
    }
}

//! Node identity and per-node state

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::State;

/// The role a node plays in the cluster
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum NodeType {
    /// Routes operations to the storage nodes owning the buckets
    Distributor,

    /// Stores bucket replicas
    Storage,
}

impl NodeType {
    /// Key used for this node type in the wire form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Distributor => "distributor",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node address: its type and index
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Node {
    /// Type of the node
    pub node_type: NodeType,
    /// Index of the node within its type
    pub index: u16,
}

impl Node {
    /// Create a new node address
    #[must_use]
    pub const fn new(node_type: NodeType, index: u16) -> Self {
        Self { node_type, index }
    }

    /// Address of the storage node with the given index
    #[must_use]
    pub const fn storage(index: u16) -> Self {
        Self::new(NodeType::Storage, index)
    }

    /// Address of the distributor node with the given index
    #[must_use]
    pub const fn distributor(index: u16) -> Self {
        Self::new(NodeType::Distributor, index)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_type, self.index)
    }
}

/// State of a single node as reported in a cluster state
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Availability of the node
    pub state: State,
    /// Free-text reason for the state
    pub description: String,
    /// Start time of the node process, in seconds. Advances when the process restarts.
    pub start_timestamp: u64,
}

impl NodeState {
    /// Create a node state without description or start timestamp
    #[must_use]
    pub const fn new(state: State) -> Self {
        Self {
            state,
            description: String::new(),
            start_timestamp: 0,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the start timestamp
    #[must_use]
    pub const fn with_start_timestamp(mut self, start_timestamp: u64) -> Self {
        self.start_timestamp = start_timestamp;
        self
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new(State::Up)
    }
}

//! Error types for cluster state parsing and validation

use thiserror::Error;

use crate::NodeType;

/// Errors raised while building a cluster state from its wire string
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClusterStateError {
    /// A token was not of the form `key:value`
    #[error("Malformed token '{0}'")]
    MalformedToken(String),

    /// The key of a token is not known
    #[error("Unknown key '{0}'")]
    UnknownKey(String),

    /// A numeric value could not be parsed
    #[error("Invalid number '{value}' for key '{key}'")]
    InvalidNumber {
        /// The key the value belongs to
        key: String,
        /// The offending value
        value: String,
    },

    /// A state character is not one of `u d m r i s`
    #[error("Invalid state '{0}'")]
    InvalidState(String),

    /// A node-specific token appeared before any node type section
    #[error("Node token '{0}' appears before a node type section")]
    MissingNodeType(String),

    /// A node-specific token references an index outside the node count
    #[error("{node_type} node {index} is outside the node count {count}")]
    NodeOutsideRange {
        /// Node type section of the token
        node_type: NodeType,
        /// Referenced index
        index: u16,
        /// Node count of the section
        count: u16,
    },
}

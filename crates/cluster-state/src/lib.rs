//! Cluster state snapshots for the distributor
//!
//! This crate provides:
//! - Node state types (State, NodeType, Node, NodeState)
//! - Versioned cluster state snapshots with their wire string form
//! - Distribution topology (groups of nodes)
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cluster_state;
pub mod distribution;
pub mod error;
pub mod node;
pub mod state;

pub use cluster_state::ClusterState;
pub use distribution::{Distribution, Group};
pub use error::ClusterStateError;
pub use node::{Node, NodeState, NodeType};
pub use state::State;

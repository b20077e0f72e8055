//! Distribution topology: how nodes are arranged in groups
//!
//! The bucket-to-node hashing itself lives elsewhere; this type only carries
//! the parts of the distribution config the distributor needs to reason about
//! ownership when nodes come and go.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{ClusterState, Node, State};

/// A leaf group of nodes. Distributor and storage node with the same index share a group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Index of the group
    pub index: u16,
    /// Name of the group
    pub name: String,
    /// Indices of the nodes in the group
    pub nodes: Vec<u16>,
}

/// Distribution configuration
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Number of replicas kept of each bucket
    pub redundancy: u16,
    /// Leaf groups
    pub groups: Vec<Group>,
    /// Move ownership away from a group as soon as all of its distributors are down
    #[serde(default)]
    pub auto_ownership_transfer_on_whole_group_down: bool,
}

impl Distribution {
    /// A single group holding nodes `0..node_count`
    #[must_use]
    pub fn flat(redundancy: u16, node_count: u16) -> Self {
        Self {
            redundancy,
            groups: vec![Group {
                index: 0,
                name: "root".to_string(),
                nodes: (0..node_count).collect(),
            }],
            auto_ownership_transfer_on_whole_group_down: false,
        }
    }

    /// Group containing the given node index, if any
    #[must_use]
    pub fn group_for_node(&self, index: u16) -> Option<&Group> {
        self.groups.iter().find(|group| group.nodes.contains(&index))
    }

    /// Returns true if every distributor of the group is down in `state`
    #[must_use]
    pub fn all_distributors_down(group: &Group, state: &ClusterState) -> bool {
        group
            .nodes
            .iter()
            .all(|&index| state.node_state(Node::distributor(index)).state == State::Down)
    }

    /// A stable string identifying this configuration. Sent along with bucket info
    /// requests so storage nodes can detect a distributor running on stale config.
    #[must_use]
    pub fn config_hash(&self) -> String {
        let mut hash = format!("({}", self.redundancy);
        if self.auto_ownership_transfer_on_whole_group_down {
            hash.push('*');
        }
        let mut groups: Vec<&Group> = self.groups.iter().collect();
        groups.sort_by_key(|group| group.index);
        for group in groups {
            let mut nodes = group.nodes.clone();
            nodes.sort_unstable();
            let _ = write!(hash, "({}", group.index);
            for node in nodes {
                let _ = write!(hash, ";{node}");
            }
            hash.push(')');
        }
        hash.push(')');
        hash
    }
}

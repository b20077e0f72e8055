//! Storage nodes whose bucket info can no longer be trusted

use std::collections::BTreeSet;

use serde::Serialize;
use tessera_cluster_state::ClusterState;

use crate::ClusterStateDiff;

/// Set of outdated storage node indices
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutdatedNodeSet {
    nodes: BTreeSet<u16>,
}

impl OutdatedNodeSet {
    /// Outdated nodes for a cluster state change.
    ///
    /// Starts from the nodes carried over from a superseded transition (those
    /// still present in the new state), then adds every storage node of the new
    /// state if the distributor layout changed, or only the changed nodes otherwise.
    #[must_use]
    pub fn for_state_change(diff: &ClusterStateDiff<'_>, carried: &BTreeSet<u16>) -> Self {
        let count = diff.new_storage_node_count();
        let mut nodes: BTreeSet<u16> = carried.iter().copied().filter(|&node| node < count).collect();

        if diff.distributor_changed() {
            nodes.extend(0..count);
        } else {
            nodes.extend((0..count).filter(|&node| diff.storage_node_changed(node)));
        }
        Self { nodes }
    }

    /// Outdated nodes for a distribution change: every storage node of the state
    #[must_use]
    pub fn for_distribution_change(state: &ClusterState) -> Self {
        Self {
            nodes: state.storage_nodes().collect(),
        }
    }

    /// Returns true if the node is outdated
    #[must_use]
    pub fn contains(&self, node: u16) -> bool {
        self.nodes.contains(&node)
    }

    /// Iterate over outdated nodes in index order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.nodes.iter().copied()
    }

    /// Number of outdated nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is outdated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Consume the set
    #[must_use]
    pub fn into_inner(self) -> BTreeSet<u16> {
        self.nodes
    }
}

impl Extend<u16> for OutdatedNodeSet {
    fn extend<I: IntoIterator<Item = u16>>(&mut self, iter: I) {
        self.nodes.extend(iter);
    }
}

impl FromIterator<u16> for OutdatedNodeSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tessera_cluster_state::{Distribution, State};

    const UP_STATES: [State; 3] = [State::Up, State::Retired, State::Initializing];

    fn state(wire: &str) -> ClusterState {
        wire.parse().unwrap()
    }

    #[test]
    fn test_state_change_takes_changed_nodes_only() {
        let distribution = Distribution::flat(2, 6);
        let prev = state("version:1 distributor:1 storage:6 .5.s:d");
        let new = state("version:2 distributor:1 storage:6 .3.s:d");
        let diff = ClusterStateDiff::new(&prev, &new, &distribution, 0, &UP_STATES);

        let outdated = OutdatedNodeSet::for_state_change(&diff, &BTreeSet::new());

        assert_eq!(outdated.iter().collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn test_state_change_keeps_carried_nodes_present_in_new_state() {
        let distribution = Distribution::flat(2, 4);
        let prev = state("version:1 distributor:1 storage:4");
        let new = state("version:2 distributor:1 storage:4");
        let diff = ClusterStateDiff::new(&prev, &new, &distribution, 0, &UP_STATES);

        let outdated = OutdatedNodeSet::for_state_change(&diff, &BTreeSet::from([1, 9]));

        assert_eq!(outdated.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_distributor_change_outdates_every_node() {
        let distribution = Distribution::flat(2, 3);
        let prev = state("version:1 distributor:2 storage:3");
        let new = state("version:2 distributor:2 .1.s:d storage:3");
        let diff = ClusterStateDiff::new(&prev, &new, &distribution, 0, &UP_STATES);

        let outdated = OutdatedNodeSet::for_state_change(&diff, &BTreeSet::new());

        assert_eq!(outdated.len(), 3);
    }

    #[test]
    fn test_distribution_change_includes_down_nodes() {
        let new = state("version:4 distributor:1 storage:5 .0.s:d .4.s:m");

        let outdated = OutdatedNodeSet::for_distribution_change(&new);

        assert_eq!(outdated.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }
}

//! Comparison of two cluster states from one distributor's point of view

use tessera_cluster_state::state::DISTRIBUTOR_AVAILABLE_STATES;
use tessera_cluster_state::{ClusterState, Distribution, Node, NodeType, State};

/// How a storage node changed between two cluster states
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeChange {
    /// Nothing that affects bucket ownership
    Unchanged,
    /// The node came up, went down, or moved between up-states
    Changed,
    /// The node restarted and may no longer hold what it reported before
    MayHaveLostData,
}

impl NodeChange {
    /// Returns true if the node's bucket info must be fetched again
    #[must_use]
    pub const fn requires_request(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Pure comparison of a previous and a new cluster state.
///
/// A storage node is considered up when it is in one of the configured
/// up-states. The verdict per node is:
///
/// | restarted | up before | up after | state differs | verdict |
/// |-----------|-----------|----------|---------------|---------|
/// | yes       | any       | any      | any           | `MayHaveLostData` |
/// | no        | yes       | no       |               | `Changed` |
/// | no        | no        | yes      |               | `Changed` |
/// | no        | yes       | yes      | yes           | `Changed` |
/// | no        | otherwise |          |               | `Unchanged` |
///
/// A node restarted if its start timestamp advanced.
#[derive(Clone, Copy, Debug)]
pub struct ClusterStateDiff<'a> {
    prev: &'a ClusterState,
    new: &'a ClusterState,
    distribution: &'a Distribution,
    distributor_index: u16,
    storage_up_states: &'a [State],
}

impl<'a> ClusterStateDiff<'a> {
    /// Compare `prev` against `new` as seen by distributor `distributor_index`
    #[must_use]
    pub const fn new(
        prev: &'a ClusterState,
        new: &'a ClusterState,
        distribution: &'a Distribution,
        distributor_index: u16,
        storage_up_states: &'a [State],
    ) -> Self {
        Self {
            prev,
            new,
            distribution,
            distributor_index,
            storage_up_states,
        }
    }

    /// Returns true if the distributor layout changed in a way that may move
    /// bucket ownership to or from this distributor
    #[must_use]
    pub fn distributor_changed(&self) -> bool {
        if self.prev.distribution_bits() != self.new.distribution_bits() {
            return true;
        }
        let me = Node::distributor(self.distributor_index);
        if self.prev.node_state(me).state == State::Down {
            return true;
        }

        let count = self
            .prev
            .node_count(NodeType::Distributor)
            .max(self.new.node_count(NodeType::Distributor));
        (0..count).any(|index| {
            let node = Node::distributor(index);
            Self::node_was_up_but_now_is_down(
                self.prev.node_state(node).state,
                self.new.node_state(node).state,
            ) && (self.node_in_same_group_as_self(index)
                || self.node_needs_ownership_transfer_from_group_down(index))
        })
    }

    /// Returns true if a distributor went from an available state to an unavailable one
    #[must_use]
    pub fn node_was_up_but_now_is_down(old: State, new: State) -> bool {
        old.one_of(&DISTRIBUTOR_AVAILABLE_STATES) && !new.one_of(&DISTRIBUTOR_AVAILABLE_STATES)
    }

    fn node_in_same_group_as_self(&self, index: u16) -> bool {
        let group_of = |node| self.distribution.group_for_node(node).map(|group| group.index);
        group_of(index) == group_of(self.distributor_index)
    }

    fn node_needs_ownership_transfer_from_group_down(&self, index: u16) -> bool {
        if !self.distribution.auto_ownership_transfer_on_whole_group_down {
            return false;
        }
        self.distribution
            .group_for_node(index)
            .is_some_and(|group| Distribution::all_distributors_down(group, self.new))
    }

    /// Verdict for a single storage node
    #[must_use]
    pub fn storage_node_change(&self, index: u16) -> NodeChange {
        if self.storage_node_may_have_lost_data(index) {
            return NodeChange::MayHaveLostData;
        }
        let node = Node::storage(index);
        let old = self.prev.node_state(node).state;
        let new = self.new.node_state(node).state;
        let old_up = old.one_of(self.storage_up_states);
        let new_up = new.one_of(self.storage_up_states);
        if old_up != new_up || (old_up && old != new) {
            NodeChange::Changed
        } else {
            NodeChange::Unchanged
        }
    }

    /// Returns true if the storage node must be asked for bucket info again
    #[must_use]
    pub fn storage_node_changed(&self, index: u16) -> bool {
        self.storage_node_change(index).requires_request()
    }

    /// Returns true if the storage node restarted between the two states
    #[must_use]
    pub fn storage_node_may_have_lost_data(&self, index: u16) -> bool {
        let node = Node::storage(index);
        self.new.node_state(node).start_timestamp > self.prev.node_state(node).start_timestamp
    }

    /// Returns true if the storage node can answer requests in the new state
    #[must_use]
    pub fn storage_node_up_in_new_state(&self, index: u16) -> bool {
        self.new
            .node_state(Node::storage(index))
            .state
            .one_of(self.storage_up_states)
    }

    /// Returns true if the whole cluster is down in the new state
    #[must_use]
    pub fn cluster_is_down(&self) -> bool {
        self.new.cluster_state() == State::Down
    }

    /// Returns true if this distributor is down in the new state
    #[must_use]
    pub fn i_am_down(&self) -> bool {
        self.new
            .node_state(Node::distributor(self.distributor_index))
            .state
            == State::Down
    }

    /// Returns true if bucket info should be requested at all
    #[must_use]
    pub fn should_request_bucket_info(&self) -> bool {
        !self.cluster_is_down() && !self.i_am_down()
    }

    /// Number of storage nodes in the new state
    #[must_use]
    pub const fn new_storage_node_count(&self) -> u16 {
        self.new.node_count(NodeType::Storage)
    }
}

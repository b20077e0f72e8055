//! The distributor's view of the currently active cluster

use std::sync::Arc;

use tessera_cluster_state::{ClusterState, Distribution};

/// Snapshot of the active cluster state and distribution, as seen by one distributor
#[derive(Clone, Debug)]
pub struct ClusterInformation {
    distributor_index: u16,
    cluster_state: Arc<ClusterState>,
    distribution: Arc<Distribution>,
}

impl ClusterInformation {
    /// Create a new snapshot
    pub const fn new(
        distributor_index: u16,
        cluster_state: Arc<ClusterState>,
        distribution: Arc<Distribution>,
    ) -> Self {
        Self {
            distributor_index,
            cluster_state,
            distribution,
        }
    }

    /// Index of this distributor
    pub const fn distributor_index(&self) -> u16 {
        self.distributor_index
    }

    /// The active cluster state
    pub const fn cluster_state(&self) -> &Arc<ClusterState> {
        &self.cluster_state
    }

    /// The active distribution
    pub const fn distribution(&self) -> &Arc<Distribution> {
        &self.distribution
    }

    /// Same snapshot with another active cluster state
    #[must_use]
    pub fn with_cluster_state(&self, cluster_state: Arc<ClusterState>) -> Self {
        Self {
            cluster_state,
            ..self.clone()
        }
    }

    /// Same snapshot with another distribution
    #[must_use]
    pub fn with_distribution(&self, distribution: Arc<Distribution>) -> Self {
        Self {
            distribution,
            ..self.clone()
        }
    }
}

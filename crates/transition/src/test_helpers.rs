//! Test helpers for pending cluster state transitions
//!
//! This module provides a recording message sender, a manually advanced clock
//! and static helper methods to cut boilerplate in transition tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_bucket_db::{BucketId, BucketInfo};
use tessera_cluster_state::{ClusterState, Distribution};

use crate::{
    BucketInfoEntry, Clock, ClusterInformation, MessageSender, RequestBucketInfoCommand,
    TransitionConfig, TransitionContext,
};

/// Message sender that records every command instead of sending it
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<RequestBucketInfoCommand>>,
}

impl RecordingSender {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command recorded since the last `take`
    pub fn sent(&self) -> Vec<RequestBucketInfoCommand> {
        self.sent.lock().clone()
    }

    /// Remove and return every recorded command
    pub fn take(&self) -> Vec<RequestBucketInfoCommand> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Recorded commands addressed to the given storage node
    pub fn commands_to(&self, node: u16) -> Vec<RequestBucketInfoCommand> {
        self.sent
            .lock()
            .iter()
            .filter(|command| command.node == node)
            .cloned()
            .collect()
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Returns true if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl MessageSender for RecordingSender {
    fn send_request(&self, command: RequestBucketInfoCommand) {
        self.sent.lock().push(command);
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Set the clock to an absolute time
    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// Parse a cluster state, panicking on malformed input
pub fn cluster_state(wire: &str) -> Arc<ClusterState> {
    Arc::new(
        wire.parse()
            .unwrap_or_else(|e| panic!("invalid cluster state {wire:?}: {e}")),
    )
}

/// Bucket info entries from (bucket, checksum) pairs
pub fn buckets(entries: &[(u64, u32)]) -> Vec<BucketInfoEntry> {
    entries
        .iter()
        .map(|&(bucket, checksum)| BucketInfoEntry {
            bucket: BucketId(bucket),
            info: BucketInfo::new(checksum, 1, 1024),
        })
        .collect()
}

/// Shared pieces of a transition under test
pub struct TestTransitionEnv {
    /// The manual clock handed to transitions
    pub clock: Arc<ManualClock>,
    /// The recording sender handed to transitions
    pub sender: Arc<RecordingSender>,
    /// Active cluster information
    pub cluster_info: Arc<ClusterInformation>,
    /// Transition config
    pub config: TransitionConfig,
}

impl TestTransitionEnv {
    /// Environment for distributor 0 with the given active state and a flat distribution
    pub fn new(active_state: &str) -> Self {
        let state = cluster_state(active_state);
        let nodes = state.node_count(tessera_cluster_state::NodeType::Storage);
        Self::with_distribution(active_state, Distribution::flat(2, nodes))
    }

    /// Environment for distributor 0 with the given active state and distribution
    pub fn with_distribution(active_state: &str, distribution: Distribution) -> Self {
        Self {
            clock: Arc::new(ManualClock::new()),
            sender: Arc::new(RecordingSender::new()),
            cluster_info: Arc::new(ClusterInformation::new(
                0,
                cluster_state(active_state),
                Arc::new(distribution),
            )),
            config: TransitionConfig::default(),
        }
    }

    /// A transition context sharing this environment's clock and sender
    pub fn context(&self) -> TransitionContext {
        TransitionContext {
            clock: self.clock.clone(),
            cluster_info: self.cluster_info.clone(),
            sender: self.sender.clone(),
            config: self.config.clone(),
            creation_timestamp: self.clock.now(),
        }
    }
}

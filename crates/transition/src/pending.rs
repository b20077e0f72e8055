//! The pending cluster state: one transition from the active cluster state
//! (or distribution) to a new one
//!
//! A transition asks every outdated, queryable storage node for its buckets in
//! every bucket space, absorbs the replies, resends failed requests after a
//! delay and, once nothing is outstanding, merges what it learned into the
//! bucket databases.
//!
//! ```text
//! Constructed -> Requesting -> AwaitingReplies <-> Retrying -> Done
//! ```
//!
//! All operations are expected to run on one serialized execution context.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tessera_bucket_db::{BucketDatabase, BucketSpace};
use tessera_cluster_state::ClusterState;
use tracing::debug;

use crate::request_tracker::RequestTemplate;
use crate::{
    BucketSpaceAndNode, BucketSpaceRepo, BucketSpaceTransition, Clock, ClusterInformation,
    ClusterStateDiff, Error, MergeStats, MessageSender, OutdatedNodeSet, ReplyDisposition,
    RequestBucketInfoReply, RequestTracker, StatusReporter, Summary, TransitionConfig,
    TransitionResult,
};

/// Lifecycle phase of a transition
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Outdated nodes are being computed
    Constructed,
    /// Initial requests are being sent
    Requesting,
    /// Waiting for replies to in-flight or delayed requests
    AwaitingReplies,
    /// Delayed requests were just sent again
    Retrying,
    /// Nothing is outstanding. Terminal.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Constructed => "constructed",
            Self::Requesting => "requesting",
            Self::AwaitingReplies => "awaiting replies",
            Self::Retrying => "retrying",
            Self::Done => "done",
        };
        f.write_str(phase)
    }
}

/// Why a transition was started
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// A new cluster state was received
    StateChange {
        /// The new cluster state
        new_state: Arc<ClusterState>,
        /// Nodes still outdated from a superseded transition
        outdated_nodes: BTreeSet<u16>,
    },
    /// The distribution config changed while the cluster state stayed the same
    DistributionChange,
}

impl Trigger {
    /// A state change with no nodes carried over
    #[must_use]
    pub const fn state_change(new_state: Arc<ClusterState>) -> Self {
        Self::StateChange {
            new_state,
            outdated_nodes: BTreeSet::new(),
        }
    }

    /// A state change from the cluster state's wire form
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClusterState`] if the wire form is malformed.
    pub fn parse_state_change(wire: &str, outdated_nodes: BTreeSet<u16>) -> TransitionResult<Self> {
        let new_state: ClusterState = wire.parse()?;
        Ok(Self::StateChange {
            new_state: Arc::new(new_state),
            outdated_nodes,
        })
    }

    /// The kind of transition this trigger starts
    #[must_use]
    pub const fn kind(&self) -> TransitionKind {
        match self {
            Self::StateChange { .. } => TransitionKind::StateChange,
            Self::DistributionChange => TransitionKind::DistributionChange,
        }
    }
}

/// Discriminant of [`Trigger`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Started by a new cluster state
    StateChange,
    /// Started by a new distribution
    DistributionChange,
}

/// Collaborators and settings a transition is constructed with
#[derive(Clone)]
pub struct TransitionContext {
    /// Time source for resend deadlines and processing time
    pub clock: Arc<dyn Clock>,
    /// The active cluster state and distribution
    pub cluster_info: Arc<ClusterInformation>,
    /// Where bucket info requests go
    pub sender: Arc<dyn MessageSender>,
    /// Transition settings
    pub config: TransitionConfig,
    /// Monotonically increasing creation time, recorded on merged copies
    pub creation_timestamp: Duration,
}

/// A cluster state transition in progress
pub struct PendingClusterState {
    kind: TransitionKind,
    phase: Phase,
    clock: Arc<dyn Clock>,
    cluster_info: Arc<ClusterInformation>,
    prev_state: Arc<ClusterState>,
    new_state: Arc<ClusterState>,
    outdated_nodes: OutdatedNodeSet,
    tracker: RequestTracker,
    transitions: BTreeMap<BucketSpace, BucketSpaceTransition>,
    started: Duration,
}

impl PendingClusterState {
    /// Start a transition and send its initial requests.
    ///
    /// The previous state is the one active in the context's cluster
    /// information. A distribution change transitions from that state to itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoBucketSpaces`] if the repo holds no bucket spaces.
    pub fn new<D>(
        context: TransitionContext,
        repo: &BucketSpaceRepo<D>,
        trigger: Trigger,
    ) -> TransitionResult<Self> {
        if repo.is_empty() {
            return Err(Error::NoBucketSpaces);
        }
        let TransitionContext {
            clock,
            cluster_info,
            sender,
            config,
            creation_timestamp,
        } = context;

        let kind = trigger.kind();
        let prev_state = cluster_info.cluster_state().clone();
        let (new_state, carried) = match trigger {
            Trigger::StateChange {
                new_state,
                outdated_nodes,
            } => (new_state, outdated_nodes),
            Trigger::DistributionChange => (prev_state.clone(), BTreeSet::new()),
        };
        let distributor_index = cluster_info.distributor_index();
        let timestamp_micros = u64::try_from(creation_timestamp.as_micros()).unwrap_or(u64::MAX);

        // Every bucket space is diffed against its own distribution
        let mut outdated_nodes = OutdatedNodeSet::default();
        let mut queryable: BTreeMap<BucketSpace, BTreeSet<u16>> = BTreeMap::new();
        let mut should_request = true;
        let mut transitions = BTreeMap::new();
        let mut distribution_hashes = BTreeMap::new();
        for (space, bucket_space) in repo.iter() {
            let space_diff = ClusterStateDiff::new(
                &prev_state,
                &new_state,
                bucket_space.distribution(),
                distributor_index,
                &config.storage_up_states,
            );
            let (space_outdated, ownership_transfer) = match kind {
                TransitionKind::StateChange => (
                    OutdatedNodeSet::for_state_change(&space_diff, &carried),
                    space_diff.distributor_changed(),
                ),
                TransitionKind::DistributionChange => {
                    (OutdatedNodeSet::for_distribution_change(&new_state), true)
                }
            };

            let mut transition = BucketSpaceTransition::new(space, ownership_transfer, timestamp_micros);
            for node in space_outdated.iter() {
                if space_diff.storage_node_may_have_lost_data(node) {
                    transition.set_node_may_have_lost_data(node);
                }
            }
            queryable.insert(
                space,
                space_outdated
                    .iter()
                    .filter(|&node| space_diff.storage_node_up_in_new_state(node))
                    .collect(),
            );
            should_request &= space_diff.should_request_bucket_info();
            outdated_nodes.extend(space_outdated.iter());
            transitions.insert(space, transition);
            distribution_hashes.insert(space, bucket_space.distribution().config_hash());
        }

        let template = RequestTemplate {
            distributor_index,
            cluster_state: new_state.clone(),
            distribution_hashes,
        };
        let tracker = RequestTracker::new(template, sender, config.resend_delay);
        let started = clock.now();

        let mut pending = Self {
            kind,
            phase: Phase::Constructed,
            clock,
            cluster_info,
            prev_state,
            new_state,
            outdated_nodes,
            tracker,
            transitions,
            started,
        };
        debug!(
            "Starting {:?} transition to version {} with outdated storage nodes {:?}",
            pending.kind,
            pending.new_state.version(),
            pending.outdated_nodes.iter().collect::<Vec<_>>()
        );

        pending.phase = Phase::Requesting;
        if should_request {
            let nodes: BTreeSet<u16> = queryable.values().flatten().copied().collect();
            for node in nodes {
                for (&space, space_nodes) in &queryable {
                    if space_nodes.contains(&node) {
                        pending
                            .tracker
                            .request_node(BucketSpaceAndNode::new(space, node));
                    }
                }
            }
        } else {
            debug!(
                "Cluster or distributor {distributor_index} is down in version {}, not requesting bucket info",
                pending.new_state.version()
            );
        }
        pending.phase = if pending.tracker.done() {
            Phase::Done
        } else {
            Phase::AwaitingReplies
        };
        Ok(pending)
    }

    /// Absorb a bucket info reply.
    ///
    /// Returns false if the reply does not answer a request in flight for this
    /// transition; such replies change nothing. Successful replies are handed
    /// to the matching bucket space, failed ones are delayed for resending.
    pub fn on_request_bucket_info_reply(&mut self, reply: &RequestBucketInfoReply) -> bool {
        let now = self.clock.now();
        let Some(disposition) = self.tracker.on_reply(reply, now) else {
            debug!(
                "Ignoring reply {} from storage node {}, no such request in flight",
                reply.key, reply.node
            );
            return false;
        };

        if let (ReplyDisposition::Delivered(target), Ok(buckets)) = (disposition, &reply.result) {
            if let Some(transition) = self.transitions.get_mut(&target.bucket_space) {
                transition.add_node_result(target.node, buckets);
            }
        }
        self.phase = if self.tracker.done() {
            Phase::Done
        } else {
            Phase::AwaitingReplies
        };
        true
    }

    /// Resend delayed requests whose deadline has passed. Returns the number resent.
    pub fn resend_delayed_messages(&mut self) -> usize {
        if self.tracker.delayed_count() == 0 {
            return 0;
        }
        let resent = self.tracker.resend_delayed(self.clock.now());
        if resent > 0 {
            debug!("Resent {resent} delayed bucket info requests");
            self.phase = Phase::Retrying;
        }
        resent
    }

    /// Record that a node's bucket info is known without a reply to this
    /// transition. The node shows as replied in the diagnostics.
    pub fn set_node_replied(&mut self, node: u16) {
        self.tracker.set_node_replied(node);
    }

    /// Returns true if no request is in flight or delayed
    pub fn done(&self) -> bool {
        self.tracker.done()
    }

    /// Merge every bucket space's results into its database in the repo.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransitionNotDone`] while requests are outstanding and
    /// [`Error::UnknownBucketSpace`] if the repo lacks a tracked bucket space.
    /// Nothing is merged when an error is returned.
    pub fn merge_into_bucket_databases<D: BucketDatabase>(
        &self,
        repo: &mut BucketSpaceRepo<D>,
    ) -> TransitionResult<MergeStats> {
        if !self.done() {
            return Err(Error::TransitionNotDone {
                in_flight: self.tracker.in_flight(),
                delayed: self.tracker.delayed_count(),
            });
        }
        if let Some(&space) = self.transitions.keys().find(|space| repo.get(**space).is_none()) {
            return Err(Error::UnknownBucketSpace(space));
        }

        let mut stats = MergeStats::default();
        for (&space, transition) in &self.transitions {
            let bucket_space = repo.get_mut(space).ok_or(Error::UnknownBucketSpace(space))?;
            stats += transition.merge_into(bucket_space.database_mut());
        }
        Ok(stats)
    }

    /// Outdated nodes, including every node with a request still outstanding
    pub fn outdated_node_set(&self) -> OutdatedNodeSet {
        let mut nodes = self.outdated_nodes.clone();
        nodes.extend(self.tracker.pending_nodes());
        nodes
    }

    /// Returns true if any bucket space detected a possible ownership transfer
    pub fn has_bucket_ownership_transfer(&self) -> bool {
        self.transitions
            .values()
            .any(BucketSpaceTransition::ownership_transfer_detected)
    }

    /// Returns true if this transition was started by a distribution change
    pub fn distribution_change(&self) -> bool {
        self.kind == TransitionKind::DistributionChange
    }

    /// What started this transition
    pub const fn kind(&self) -> TransitionKind {
        self.kind
    }

    /// Current lifecycle phase
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The state transitioned from
    pub const fn prev_cluster_state(&self) -> &Arc<ClusterState> {
        &self.prev_state
    }

    /// The state transitioned to
    pub const fn new_cluster_state(&self) -> &Arc<ClusterState> {
        &self.new_state
    }

    /// Cluster information the transition was started with
    pub const fn cluster_info(&self) -> &Arc<ClusterInformation> {
        &self.cluster_info
    }

    /// Results collected for a bucket space
    pub fn bucket_space_transition(&self, space: BucketSpace) -> Option<&BucketSpaceTransition> {
        self.transitions.get(&space)
    }

    /// The request tracker
    pub const fn request_tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Prev and new state with the time spent so far
    pub fn summary(&self) -> Summary {
        Summary {
            prev_cluster_state: self.prev_state.to_string(),
            new_cluster_state: self.new_state.to_string(),
            processing_time: self.clock.now().saturating_sub(self.started),
        }
    }

    /// Request status per bucket space and node, e.g.
    /// `default: 3 (replied), 5 (awaiting reply); global: 3 (delayed)`
    pub fn request_nodes_to_string(&self) -> String {
        let mut out = String::new();
        let mut current_space = None;
        for (target, status) in self.tracker.statuses() {
            if current_space == Some(target.bucket_space) {
                out.push_str(", ");
            } else {
                if current_space.is_some() {
                    out.push_str("; ");
                }
                let _ = write!(out, "{}: ", target.bucket_space);
                current_space = Some(target.bucket_space);
            }
            let _ = write!(out, "{} ({status})", target.node);
        }
        out
    }
}

impl StatusReporter for PendingClusterState {
    fn status_report(&self) -> serde_json::Value {
        json!({
            "kind": self.kind,
            "phase": self.phase,
            "prev_cluster_state": self.prev_state.to_string(),
            "new_cluster_state": self.new_state.to_string(),
            "outdated_nodes": self.outdated_node_set(),
            "in_flight": self.tracker.in_flight(),
            "delayed": self.tracker.delayed().collect::<Vec<_>>(),
            "replied_nodes": self.tracker.replied_nodes(),
            "ownership_transfer": self.has_bucket_ownership_transfer(),
            "requests": self.request_nodes_to_string(),
            "processing_time_ms": u64::try_from(self.summary().processing_time.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

impl fmt::Debug for PendingClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingClusterState")
            .field("kind", &self.kind)
            .field("phase", &self.phase)
            .field("prev_state", &self.prev_state.to_string())
            .field("new_state", &self.new_state.to_string())
            .field("outdated_nodes", &self.outdated_nodes)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

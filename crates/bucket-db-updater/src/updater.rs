//! Owner of the bucket databases and the live transition

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::json;
use tessera_bucket_db::BucketDatabase;
use tessera_cluster_state::{ClusterState, Distribution};
use tessera_transition::{
    BucketSpaceRepo, Clock, ClusterInformation, MergeStats, MessageSender, PendingClusterState,
    RequestBucketInfoReply, StatusReporter, Summary, TransitionContext, Trigger,
};
use tracing::{debug, info};

use crate::{UpdaterConfig, UpdaterResult};

/// Keeps the bucket databases in step with the cluster state.
///
/// At most one transition is live. Starting a new one drops the old one;
/// nodes the old one still considered outdated are carried into the new one
/// when it is a state change.
pub struct BucketDbUpdater<D> {
    config: UpdaterConfig,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn MessageSender>,
    cluster_info: Arc<ClusterInformation>,
    repo: BucketSpaceRepo<D>,
    pending: Option<PendingClusterState>,
    history: VecDeque<Summary>,
    last_merge: Option<MergeStats>,
}

impl<D: BucketDatabase> BucketDbUpdater<D> {
    /// Create an updater with `cluster_info` as the active state
    pub fn new(
        config: UpdaterConfig,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn MessageSender>,
        cluster_info: ClusterInformation,
        repo: BucketSpaceRepo<D>,
    ) -> Self {
        Self {
            config,
            clock,
            sender,
            cluster_info: Arc::new(cluster_info),
            repo,
            pending: None,
            history: VecDeque::new(),
            last_merge: None,
        }
    }

    /// Start a transition to a new cluster state
    ///
    /// # Errors
    ///
    /// Returns an error if the transition cannot be started, or if it finished
    /// at once and could not be merged.
    pub fn on_set_cluster_state(&mut self, state: Arc<ClusterState>) -> UpdaterResult<()> {
        let outdated_nodes = match self.pending.take() {
            Some(superseded) => {
                debug!(
                    "Cluster state version {} supersedes pending version {}",
                    state.version(),
                    superseded.new_cluster_state().version()
                );
                superseded.outdated_node_set().into_inner()
            }
            None => Default::default(),
        };

        let trigger = Trigger::StateChange {
            new_state: state,
            outdated_nodes,
        };
        let pending = PendingClusterState::new(self.context(), &self.repo, trigger)?;
        self.install(pending)
    }

    /// Install a new distribution in every bucket space and start a transition for it
    ///
    /// # Errors
    ///
    /// Returns an error if the transition cannot be started, or if it finished
    /// at once and could not be merged.
    pub fn on_distribution_change(&mut self, distribution: Arc<Distribution>) -> UpdaterResult<()> {
        if let Some(superseded) = self.pending.take() {
            debug!(
                "Distribution change supersedes pending cluster state version {}",
                superseded.new_cluster_state().version()
            );
        }
        self.repo.set_distribution(&distribution);
        self.cluster_info = Arc::new(self.cluster_info.with_distribution(distribution));

        let pending =
            PendingClusterState::new(self.context(), &self.repo, Trigger::DistributionChange)?;
        self.install(pending)
    }

    /// Route a bucket info reply to the live transition.
    ///
    /// Returns false if no live transition accepted the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply completed the transition and merging failed.
    pub fn on_request_bucket_info_reply(
        &mut self,
        reply: &RequestBucketInfoReply,
    ) -> UpdaterResult<bool> {
        let Some(pending) = self.pending.as_mut() else {
            debug!(
                "Dropping reply {} from storage node {}, no transition in progress",
                reply.key, reply.node
            );
            return Ok(false);
        };
        if !pending.on_request_bucket_info_reply(reply) {
            return Ok(false);
        }

        if pending.done() {
            if let Some(pending) = self.pending.take() {
                self.complete(&pending)?;
            }
        }
        Ok(true)
    }

    /// Resend the live transition's delayed requests that are due
    pub fn resend_delayed_messages(&mut self) -> usize {
        self.pending
            .as_mut()
            .map_or(0, PendingClusterState::resend_delayed_messages)
    }

    /// The active cluster state and distribution
    pub const fn cluster_info(&self) -> &Arc<ClusterInformation> {
        &self.cluster_info
    }

    /// The bucket databases
    pub const fn repo(&self) -> &BucketSpaceRepo<D> {
        &self.repo
    }

    /// The live transition, if any
    pub const fn pending(&self) -> Option<&PendingClusterState> {
        self.pending.as_ref()
    }

    /// Summaries of recently completed transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Summary> {
        self.history.iter()
    }

    /// What the last completed transition changed
    pub const fn last_merge_stats(&self) -> Option<MergeStats> {
        self.last_merge
    }

    /// Updater configuration
    pub const fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    fn context(&self) -> TransitionContext {
        TransitionContext {
            clock: self.clock.clone(),
            cluster_info: self.cluster_info.clone(),
            sender: self.sender.clone(),
            config: self.config.transition.clone(),
            creation_timestamp: self.clock.now(),
        }
    }

    fn install(&mut self, pending: PendingClusterState) -> UpdaterResult<()> {
        if pending.done() {
            self.complete(&pending)
        } else {
            self.pending = Some(pending);
            Ok(())
        }
    }

    fn complete(&mut self, pending: &PendingClusterState) -> UpdaterResult<()> {
        let stats = pending.merge_into_bucket_databases(&mut self.repo)?;
        self.cluster_info = Arc::new(
            self.cluster_info
                .with_cluster_state(pending.new_cluster_state().clone()),
        );

        let summary = pending.summary();
        info!("Completed cluster state transition {summary} ({stats:?})");
        if self.config.history_size > 0 {
            if self.history.len() == self.config.history_size {
                self.history.pop_front();
            }
            self.history.push_back(summary);
        }
        self.last_merge = Some(stats);
        Ok(())
    }
}

impl<D: BucketDatabase> StatusReporter for BucketDbUpdater<D> {
    fn status_report(&self) -> serde_json::Value {
        json!({
            "cluster_state": self.cluster_info.cluster_state().to_string(),
            "distribution": self.cluster_info.distribution().config_hash(),
            "pending": self.pending.as_ref().map(|pending| pending.status_report()),
            "history": self.history.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "last_merge": self.last_merge,
        })
    }
}

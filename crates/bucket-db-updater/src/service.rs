//! Runs a [`BucketDbUpdater`] on its own tokio task
//!
//! Every input reaches the updater through one channel, so cluster state
//! changes, replies and resend ticks never interleave.

use std::sync::Arc;
use std::time::Duration;

use tessera_bucket_db::BucketDatabase;
use tessera_cluster_state::{ClusterState, Distribution};
use tessera_transition::{RequestBucketInfoReply, StatusReporter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{BucketDbUpdater, UpdaterError, UpdaterResult};

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

enum UpdaterMessage {
    SetClusterState {
        state: Arc<ClusterState>,
        response: oneshot::Sender<UpdaterResult<()>>,
    },
    DistributionChanged {
        distribution: Arc<Distribution>,
        response: oneshot::Sender<UpdaterResult<()>>,
    },
    Reply {
        reply: RequestBucketInfoReply,
        response: oneshot::Sender<UpdaterResult<bool>>,
    },
    Status {
        response: oneshot::Sender<serde_json::Value>,
    },
}

/// Spawns updater tasks
pub struct UpdaterService;

impl UpdaterService {
    /// Move the updater onto a new task and return a handle to it
    pub fn spawn<D: BucketDatabase>(updater: BucketDbUpdater<D>) -> UpdaterHandle<D> {
        let (tx, rx) = mpsc::channel(updater.config().channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(updater, rx, shutdown_rx));

        UpdaterHandle {
            tx,
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a running updater task
pub struct UpdaterHandle<D> {
    tx: mpsc::Sender<UpdaterMessage>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<BucketDbUpdater<D>>,
}

impl<D: BucketDatabase> UpdaterHandle<D> {
    /// Start a transition to a new cluster state
    ///
    /// # Errors
    ///
    /// Returns the updater's error, or [`UpdaterError::ChannelClosed`] if the task is gone.
    pub async fn set_cluster_state(&self, state: Arc<ClusterState>) -> UpdaterResult<()> {
        let (response, rx) = oneshot::channel();
        self.send(UpdaterMessage::SetClusterState { state, response })
            .await?;
        rx.await.map_err(|_| UpdaterError::ChannelClosed)?
    }

    /// Install a new distribution and start a transition for it
    ///
    /// # Errors
    ///
    /// Returns the updater's error, or [`UpdaterError::ChannelClosed`] if the task is gone.
    pub async fn distribution_changed(&self, distribution: Arc<Distribution>) -> UpdaterResult<()> {
        let (response, rx) = oneshot::channel();
        self.send(UpdaterMessage::DistributionChanged {
            distribution,
            response,
        })
        .await?;
        rx.await.map_err(|_| UpdaterError::ChannelClosed)?
    }

    /// Deliver a reply from a storage node. Returns false if no transition accepted it.
    ///
    /// # Errors
    ///
    /// Returns the updater's error, or [`UpdaterError::ChannelClosed`] if the task is gone.
    pub async fn deliver_reply(&self, reply: RequestBucketInfoReply) -> UpdaterResult<bool> {
        let (response, rx) = oneshot::channel();
        self.send(UpdaterMessage::Reply { reply, response }).await?;
        rx.await.map_err(|_| UpdaterError::ChannelClosed)?
    }

    /// The updater's status report
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::ChannelClosed`] if the task is gone.
    pub async fn status(&self) -> UpdaterResult<serde_json::Value> {
        let (response, rx) = oneshot::channel();
        self.send(UpdaterMessage::Status { response }).await?;
        rx.await.map_err(|_| UpdaterError::ChannelClosed)
    }

    /// Stop the task and take back the updater
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::TaskFailed`] if the task panicked or was cancelled.
    pub async fn shutdown(self) -> UpdaterResult<BucketDbUpdater<D>> {
        let _ = self.shutdown_tx.send(());
        self.task
            .await
            .map_err(|e| UpdaterError::TaskFailed(e.to_string()))
    }

    async fn send(&self, message: UpdaterMessage) -> UpdaterResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| UpdaterError::ChannelClosed)
    }
}

async fn run<D: BucketDatabase>(
    mut updater: BucketDbUpdater<D>,
    mut rx: mpsc::Receiver<UpdaterMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> BucketDbUpdater<D> {
    let mut tick = tokio::time::interval(updater.config().tick_interval.max(MIN_TICK_INTERVAL));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(message) = rx.recv() => handle_message(&mut updater, message),
            _ = tick.tick() => {
                let resent = updater.resend_delayed_messages();
                if resent > 0 {
                    debug!("Resend tick sent {resent} delayed requests");
                }
            }
            _ = &mut shutdown_rx => {
                info!("Bucket database updater shutting down");
                break;
            }
        }
    }
    updater
}

fn handle_message<D: BucketDatabase>(updater: &mut BucketDbUpdater<D>, message: UpdaterMessage) {
    match message {
        UpdaterMessage::SetClusterState { state, response } => {
            let result = updater.on_set_cluster_state(state);
            if let Err(e) = &result {
                warn!("Failed to handle new cluster state: {e}");
            }
            let _ = response.send(result);
        }
        UpdaterMessage::DistributionChanged {
            distribution,
            response,
        } => {
            let result = updater.on_distribution_change(distribution);
            if let Err(e) = &result {
                warn!("Failed to handle distribution change: {e}");
            }
            let _ = response.send(result);
        }
        UpdaterMessage::Reply { reply, response } => {
            let _ = response.send(updater.on_request_bucket_info_reply(&reply));
        }
        UpdaterMessage::Status { response } => {
            let _ = response.send(updater.status_report());
        }
    }
}

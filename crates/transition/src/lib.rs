//! Pending cluster state transitions for the distributor
//!
//! When a new cluster state (or a new distribution config) arrives, the
//! distributor cannot route operations until it has re-learned which buckets
//! live on which storage nodes. This crate provides:
//! - The diff between the previous and the new cluster state
//! - The set of outdated storage nodes that must be asked for bucket info
//! - Tracking of in-flight and delayed bucket info requests
//! - Per bucket space collection of results and their merge into the bucket databases
//! - The state machine tying it all together
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket_space_transition;
pub mod clock;
pub mod cluster_info;
pub mod config;
pub mod diff;
pub mod error;
pub mod messages;
pub mod outdated;
pub mod pending;
pub mod repo;
pub mod request_tracker;
pub mod sender;
pub mod summary;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use bucket_space_transition::{BucketSpaceTransition, MergeStats};
pub use clock::{Clock, SystemClock};
pub use cluster_info::ClusterInformation;
pub use config::TransitionConfig;
pub use diff::{ClusterStateDiff, NodeChange};
pub use error::{Error, TransitionResult};
pub use messages::{
    BucketInfoEntry, BucketSpaceAndNode, ReplyFailure, RequestBucketInfoCommand,
    RequestBucketInfoReply, RequestKey,
};
pub use outdated::OutdatedNodeSet;
pub use pending::{PendingClusterState, Phase, TransitionContext, TransitionKind, Trigger};
pub use repo::{BucketSpaceRepo, DistributorBucketSpace};
pub use request_tracker::{
    DelayedRequest, ReplyDisposition, RequestStatus, RequestTemplate, RequestTracker,
};
pub use sender::MessageSender;
pub use summary::{StatusReporter, Summary};

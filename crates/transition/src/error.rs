//! Error types for pending cluster state transitions
//!
//! Node level failures (timeouts, unreachable nodes) are not errors: they are
//! tracked as delayed requests. Only construction problems and misuse of the
//! merge step surface here.

use tessera_bucket_db::BucketSpace;
use tessera_cluster_state::ClusterStateError;
use thiserror::Error;

/// Result type for transition operations
pub type TransitionResult<T> = Result<T, Error>;

/// Main transition error type
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The cluster state could not be built from its wire form
    #[error("Cluster state error: {0}")]
    ClusterState(#[from] ClusterStateError),

    /// A transition needs at least one bucket space to track
    #[error("No bucket spaces configured")]
    NoBucketSpaces,

    /// Merge was attempted while requests are still outstanding
    #[error("Transition is not done: {in_flight} requests in flight, {delayed} delayed")]
    TransitionNotDone {
        /// Number of requests awaiting a reply
        in_flight: usize,
        /// Number of requests waiting to be resent
        delayed: usize,
    },

    /// The bucket space repo has no database for a tracked bucket space
    #[error("Unknown bucket space {0}")]
    UnknownBucketSpace(BucketSpace),
}

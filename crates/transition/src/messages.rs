//! Bucket info request and reply messages exchanged with storage nodes

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tessera_bucket_db::{BucketId, BucketInfo, BucketSpace};
use tessera_cluster_state::ClusterState;
use thiserror::Error;

static NEXT_REQUEST_KEY: AtomicU64 = AtomicU64::new(1);

/// Identifier of an outgoing request. Unique within the process, so a reply
/// meant for a superseded transition never matches a newer one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RequestKey(pub u64);

impl RequestKey {
    /// Allocate a fresh key
    pub fn next() -> Self {
        Self(NEXT_REQUEST_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The target of a bucket info request
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BucketSpaceAndNode {
    /// Bucket space asked about
    pub bucket_space: BucketSpace,
    /// Storage node asked
    pub node: u16,
}

impl BucketSpaceAndNode {
    /// Create a new target
    #[must_use]
    pub const fn new(bucket_space: BucketSpace, node: u16) -> Self {
        Self { bucket_space, node }
    }
}

impl fmt::Display for BucketSpaceAndNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket_space, self.node)
    }
}

/// Bucket info reported for one bucket
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BucketInfoEntry {
    /// The bucket
    pub bucket: BucketId,
    /// Its info on the replying node
    pub info: BucketInfo,
}

/// Asks a storage node for the info of every bucket it holds in a bucket space
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestBucketInfoCommand {
    /// Key the reply must carry
    pub key: RequestKey,
    /// Bucket space asked about
    pub bucket_space: BucketSpace,
    /// Storage node the request is addressed to
    pub node: u16,
    /// Index of the requesting distributor
    pub distributor_index: u16,
    /// Cluster state the storage node should filter its buckets by
    pub cluster_state: Arc<ClusterState>,
    /// Config hash of the distribution used by the distributor
    pub distribution_hash: String,
}

impl RequestBucketInfoCommand {
    /// Build a successful reply to this command
    #[must_use]
    pub fn reply_with(&self, buckets: Vec<BucketInfoEntry>) -> RequestBucketInfoReply {
        RequestBucketInfoReply {
            key: self.key,
            node: self.node,
            result: Ok(buckets),
        }
    }

    /// Build a failed reply to this command
    #[must_use]
    pub fn reply_failed(&self, failure: ReplyFailure) -> RequestBucketInfoReply {
        RequestBucketInfoReply {
            key: self.key,
            node: self.node,
            result: Err(failure),
        }
    }
}

/// Why a bucket info request did not produce a result
#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize, Deserialize)]
pub enum ReplyFailure {
    /// No reply within the transport timeout
    #[error("timeout")]
    Timeout,

    /// No connection to the node
    #[error("not connected")]
    NotConnected,

    /// The node was too busy to answer
    #[error("busy")]
    Busy,

    /// The node aborted the request, e.g. while shutting down
    #[error("aborted")]
    Aborted,

    /// The node rejected the request
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Reply from a storage node to a [`RequestBucketInfoCommand`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestBucketInfoReply {
    /// Key of the request being answered
    pub key: RequestKey,
    /// Replying storage node
    pub node: u16,
    /// Reported buckets, or why there are none
    pub result: Result<Vec<BucketInfoEntry>, ReplyFailure>,
}

impl RequestBucketInfoReply {
    /// Returns true if the reply carries bucket info
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

//! Bucket database updater for the distributor
//!
//! Owns the bucket databases of every bucket space and at most one live
//! pending cluster state. New cluster states and distribution changes start a
//! transition, superseding any live one; replies from storage nodes are routed
//! to it; once it is done its results are merged and the new state becomes
//! active.
//!
//! [`UpdaterService`] runs an updater on a single tokio task so that every
//! input is handled in order.
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod sender;
pub mod service;
pub mod updater;

pub use config::UpdaterConfig;
pub use error::{UpdaterError, UpdaterResult};
pub use sender::ChannelSender;
pub use service::{UpdaterHandle, UpdaterService};
pub use updater::BucketDbUpdater;

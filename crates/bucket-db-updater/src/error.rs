//! Error types for the bucket database updater

use thiserror::Error;

/// Result type for updater operations
pub type UpdaterResult<T> = Result<T, UpdaterError>;

/// Updater error type
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// A transition could not be started or merged
    #[error("Transition error: {0}")]
    Transition(#[from] tessera_transition::Error),

    /// The updater service is no longer running
    #[error("Updater service channel closed")]
    ChannelClosed,

    /// The updater task ended abnormally
    #[error("Updater task failed: {0}")]
    TaskFailed(String),
}

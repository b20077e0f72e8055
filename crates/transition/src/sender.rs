//! Outbound message seam

use crate::RequestBucketInfoCommand;

/// Sends bucket info requests to storage nodes.
///
/// Sending is fire-and-forget: the reply, or a failed reply when the
/// transport gives up, comes back through the transition's reply intake.
pub trait MessageSender: Send + Sync {
    /// Dispatch a request to the storage node named in the command
    fn send_request(&self, command: RequestBucketInfoCommand);
}

//! Message sender feeding a tokio channel

use tessera_transition::{MessageSender, RequestBucketInfoCommand};
use tokio::sync::mpsc;
use tracing::warn;

/// Sends bucket info requests into an unbounded channel drained by the transport
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<RequestBucketInfoCommand>,
}

impl ChannelSender {
    /// Create a sender and the receiver the transport reads commands from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestBucketInfoCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSender for ChannelSender {
    fn send_request(&self, command: RequestBucketInfoCommand) {
        let (key, node) = (command.key, command.node);
        if self.tx.send(command).is_err() {
            // The request stays in flight until the transition is superseded
            warn!("Dropping bucket info request {key} to storage node {node}: transport is gone");
        }
    }
}

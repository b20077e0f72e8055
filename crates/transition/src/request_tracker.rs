//! In-flight and delayed bucket info requests of one transition

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tessera_bucket_db::BucketSpace;
use tessera_cluster_state::ClusterState;
use tracing::{debug, warn};

use crate::{
    BucketSpaceAndNode, MessageSender, RequestBucketInfoCommand, RequestBucketInfoReply,
    RequestKey,
};

/// Fields shared by every request of a transition
#[derive(Clone, Debug)]
pub struct RequestTemplate {
    /// Index of the requesting distributor
    pub distributor_index: u16,
    /// Cluster state sent along with each request
    pub cluster_state: Arc<ClusterState>,
    /// Distribution config hash per bucket space
    pub distribution_hashes: BTreeMap<BucketSpace, String>,
}

/// Progress of the request to one (bucket space, node) pair
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Sent, no reply yet
    AwaitingReply,
    /// Failed, waiting to be resent
    Delayed,
    /// Bucket info received
    Replied,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::AwaitingReply => "awaiting reply",
            Self::Delayed => "delayed",
            Self::Replied => "replied",
        };
        f.write_str(status)
    }
}

/// A failed request waiting for its resend deadline
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct DelayedRequest {
    /// Clock time at which the request is sent again
    pub deadline: Duration,
    /// Bucket space and node to ask
    pub target: BucketSpaceAndNode,
}

/// What happened to an accepted reply
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplyDisposition {
    /// The reply carried bucket info for the target
    Delivered(BucketSpaceAndNode),
    /// The reply failed and the request was scheduled for resending
    Deferred {
        /// Bucket space and node to ask again
        target: BucketSpaceAndNode,
        /// When the request is sent again
        deadline: Duration,
    },
}

/// Owns the keyed table of in-flight requests and the deadline ordered queue
/// of delayed ones.
///
/// The tracker is done when both are empty. A request that keeps failing is
/// delayed and resent forever; a node is never assumed to hold no buckets
/// without having said so.
pub struct RequestTracker {
    template: RequestTemplate,
    sender: Arc<dyn MessageSender>,
    resend_delay: Duration,
    sent: BTreeMap<RequestKey, BucketSpaceAndNode>,
    delayed: VecDeque<DelayedRequest>,
    statuses: BTreeMap<BucketSpaceAndNode, RequestStatus>,
    replied_nodes: BTreeSet<u16>,
}

impl RequestTracker {
    /// Create an empty tracker
    pub fn new(
        template: RequestTemplate,
        sender: Arc<dyn MessageSender>,
        resend_delay: Duration,
    ) -> Self {
        Self {
            template,
            sender,
            resend_delay,
            sent: BTreeMap::new(),
            delayed: VecDeque::new(),
            statuses: BTreeMap::new(),
            replied_nodes: BTreeSet::new(),
        }
    }

    /// Send a bucket info request to the target and start tracking it
    pub fn request_node(&mut self, target: BucketSpaceAndNode) -> RequestKey {
        let key = RequestKey::next();
        let distribution_hash = self
            .template
            .distribution_hashes
            .get(&target.bucket_space)
            .cloned()
            .unwrap_or_default();
        let command = RequestBucketInfoCommand {
            key,
            bucket_space: target.bucket_space,
            node: target.node,
            distributor_index: self.template.distributor_index,
            cluster_state: self.template.cluster_state.clone(),
            distribution_hash,
        };

        debug!(
            "Requesting bucket info for {} from storage node {} ({key})",
            target.bucket_space, target.node
        );
        self.sent.insert(key, target);
        self.statuses.insert(target, RequestStatus::AwaitingReply);
        self.sender.send_request(command);
        key
    }

    /// Stop tracking the request answered by `reply`.
    ///
    /// Returns `None` for keys that are not in flight, leaving the tracker
    /// untouched. Failed replies are rescheduled at `now` plus the resend delay.
    pub fn on_reply(
        &mut self,
        reply: &RequestBucketInfoReply,
        now: Duration,
    ) -> Option<ReplyDisposition> {
        let target = self.sent.remove(&reply.key)?;
        if reply.node != target.node {
            warn!(
                "Reply {} came from storage node {} but was sent to node {}",
                reply.key, reply.node, target.node
            );
        }

        match &reply.result {
            Ok(_) => {
                self.statuses.insert(target, RequestStatus::Replied);
                self.replied_nodes.insert(target.node);
                Some(ReplyDisposition::Delivered(target))
            }
            Err(failure) => {
                let deadline = now + self.resend_delay;
                debug!(
                    "Bucket info request for {} to storage node {} failed ({failure}), resending in {:?}",
                    target.bucket_space, target.node, self.resend_delay
                );
                let position = self
                    .delayed
                    .partition_point(|delayed| delayed.deadline <= deadline);
                self.delayed
                    .insert(position, DelayedRequest { deadline, target });
                self.statuses.insert(target, RequestStatus::Delayed);
                Some(ReplyDisposition::Deferred { target, deadline })
            }
        }
    }

    /// Resend every delayed request whose deadline is at or before `now`, in
    /// deadline order. Returns the number of requests sent.
    pub fn resend_delayed(&mut self, now: Duration) -> usize {
        let mut resent = 0;
        while self
            .delayed
            .front()
            .is_some_and(|delayed| delayed.deadline <= now)
        {
            if let Some(delayed) = self.delayed.pop_front() {
                self.request_node(delayed.target);
                resent += 1;
            }
        }
        resent
    }

    /// Record that the node's bucket info is known without a fresh reply.
    ///
    /// The node shows as replied in every bucket space. Requests still
    /// outstanding for it stay tracked, so [`done`](Self::done) is unaffected.
    pub fn set_node_replied(&mut self, node: u16) {
        self.replied_nodes.insert(node);
        for &bucket_space in self.template.distribution_hashes.keys() {
            self.statuses
                .insert(BucketSpaceAndNode::new(bucket_space, node), RequestStatus::Replied);
        }
    }

    /// Returns true if no request is in flight or delayed
    pub fn done(&self) -> bool {
        self.sent.is_empty() && self.delayed.is_empty()
    }

    /// Nodes with a request in flight or delayed
    pub fn pending_nodes(&self) -> BTreeSet<u16> {
        self.sent
            .values()
            .map(|target| target.node)
            .chain(self.delayed.iter().map(|delayed| delayed.target.node))
            .collect()
    }

    /// Returns true if the node has replied or was marked as replied
    pub fn has_replied(&self, node: u16) -> bool {
        self.replied_nodes.contains(&node)
    }

    /// Nodes that replied or were marked as replied
    pub const fn replied_nodes(&self) -> &BTreeSet<u16> {
        &self.replied_nodes
    }

    /// Number of requests awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.sent.len()
    }

    /// Target of an in-flight request
    pub fn target_of(&self, key: RequestKey) -> Option<BucketSpaceAndNode> {
        self.sent.get(&key).copied()
    }

    /// Delayed requests in deadline order
    pub fn delayed(&self) -> impl Iterator<Item = &DelayedRequest> {
        self.delayed.iter()
    }

    /// Number of delayed requests
    pub fn delayed_count(&self) -> usize {
        self.delayed.len()
    }

    /// Earliest resend deadline, if any request is delayed
    pub fn next_deadline(&self) -> Option<Duration> {
        self.delayed.front().map(|delayed| delayed.deadline)
    }

    /// Status of every target ever requested, ordered by bucket space then node
    pub fn statuses(&self) -> impl Iterator<Item = (BucketSpaceAndNode, RequestStatus)> + '_ {
        self.statuses.iter().map(|(target, status)| (*target, *status))
    }
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracker")
            .field("sent", &self.sent)
            .field("delayed", &self.delayed)
            .field("replied_nodes", &self.replied_nodes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplyFailure;
    use crate::test_helpers::RecordingSender;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const DELAY: Duration = Duration::from_millis(100);

    fn tracker(sender: &Arc<RecordingSender>) -> RequestTracker {
        let template = RequestTemplate {
            distributor_index: 2,
            cluster_state: Arc::new("version:5 distributor:3 storage:8".parse().unwrap()),
            distribution_hashes: BTreeMap::from([(BucketSpace::DEFAULT, "(2(0;0;1))".to_string())]),
        };
        RequestTracker::new(template, sender.clone(), DELAY)
    }

    fn target(node: u16) -> BucketSpaceAndNode {
        BucketSpaceAndNode::new(BucketSpace::DEFAULT, node)
    }

    #[test]
    fn test_request_node_sends_command() {
        let sender = Arc::new(RecordingSender::new());
        let mut tracker = tracker(&sender);

        let key = tracker.request_node(target(4));

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, key);
        assert_eq!(sent[0].node, 4);
        assert_eq!(sent[0].distributor_index, 2);
        assert_eq!(sent[0].cluster_state.version(), 5);
        assert_eq!(sent[0].distribution_hash, "(2(0;0;1))");
        assert_eq!(tracker.target_of(key), Some(target(4)));
        assert!(!tracker.done());
    }

    #[test]
    fn test_success_reply_completes_request() {
        let sender = Arc::new(RecordingSender::new());
        let mut tracker = tracker(&sender);
        tracker.request_node(target(4));
        let reply = sender.take()[0].reply_with(Vec::new());

        let disposition = tracker.on_reply(&reply, Duration::ZERO);

        assert_eq!(disposition, Some(ReplyDisposition::Delivered(target(4))));
        assert!(tracker.done());
        assert!(tracker.has_replied(4));
        assert_eq!(
            tracker.statuses().collect::<Vec<_>>(),
            vec![(target(4), RequestStatus::Replied)]
        );
    }

    #[test]
    fn test_unknown_key_changes_nothing() {
        let sender = Arc::new(RecordingSender::new());
        let mut tracker = tracker(&sender);
        tracker.request_node(target(4));
        let stale = RequestBucketInfoReply {
            key: RequestKey::next(),
            node: 4,
            result: Ok(Vec::new()),
        };

        assert_eq!(tracker.on_reply(&stale, Duration::ZERO), None);
        assert_eq!(tracker.in_flight(), 1);
        assert!(!tracker.has_replied(4));
    }

    #[test]
    #[traced_test]
    fn test_failed_reply_is_delayed_then_resent() {
        let sender = Arc::new(RecordingSender::new());
        let mut tracker = tracker(&sender);
        tracker.request_node(target(7));
        let reply = sender.take()[0].reply_failed(ReplyFailure::Timeout);

        let disposition = tracker.on_reply(&reply, Duration::from_millis(10));

        assert_matches!(disposition, Some(ReplyDisposition::Deferred { deadline, .. }) if deadline == Duration::from_millis(110));
        assert!(!tracker.done());
        assert_eq!(tracker.pending_nodes(), BTreeSet::from([7]));
        assert!(logs_contain("failed (timeout)"));

        assert_eq!(tracker.resend_delayed(Duration::from_millis(109)), 0);
        assert!(sender.sent().is_empty());

        assert_eq!(tracker.resend_delayed(Duration::from_millis(110)), 1);
        assert_eq!(sender.commands_to(7).len(), 1);
        assert_eq!(tracker.delayed_count(), 0);
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn test_delayed_requests_resend_in_deadline_order() {
        let sender = Arc::new(RecordingSender::new());
        let mut tracker = tracker(&sender);
        for node in [1, 2, 3] {
            tracker.request_node(target(node));
        }
        let commands = sender.take();
        tracker.on_reply(&commands[2].reply_failed(ReplyFailure::Busy), Duration::from_millis(0));
        tracker.on_reply(&commands[0].reply_failed(ReplyFailure::Busy), Duration::from_millis(30));
        tracker.on_reply(&commands[1].reply_failed(ReplyFailure::Busy), Duration::from_millis(20));

        assert_eq!(
            tracker.delayed().map(|d| d.target.node).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(tracker.next_deadline(), Some(Duration::from_millis(100)));

        assert_eq!(tracker.resend_delayed(Duration::from_millis(125)), 2);
        assert_eq!(
            sender.sent().iter().map(|c| c.node).collect::<Vec<_>>(),
            vec![3, 2]
        );
        assert_eq!(tracker.delayed().map(|d| d.target.node).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_set_node_replied_keeps_outstanding_requests() {
        let sender = Arc::new(RecordingSender::new());
        let mut tracker = tracker(&sender);
        tracker.request_node(target(1));

        tracker.set_node_replied(1);

        assert!(tracker.has_replied(1));
        assert!(!tracker.done());
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(
            tracker.statuses().collect::<Vec<_>>(),
            vec![(target(1), RequestStatus::Replied)]
        );
    }
}

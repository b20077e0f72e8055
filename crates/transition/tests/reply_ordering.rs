use std::time::Duration;

use proptest::prelude::*;
use tessera_bucket_db::{BucketDatabase, BucketId, BucketSpace};
use tessera_bucket_db_memory::MemoryBucketDatabase;
use tessera_transition::test_helpers::{TestTransitionEnv, buckets, cluster_state};
use tessera_transition::{
    BucketSpaceRepo, PendingClusterState, ReplyFailure, RequestBucketInfoCommand,
    RequestBucketInfoReply, Trigger,
};

fn all_down(nodes: u16) -> String {
    let mut wire = format!("version:1 distributor:1 storage:{nodes}");
    for node in 0..nodes {
        wire.push_str(&format!(" .{node}.s:d"));
    }
    wire
}

fn success(command: &RequestBucketInfoCommand) -> RequestBucketInfoReply {
    command.reply_with(buckets(&[(u64::from(command.node) + 1, u32::from(command.node))]))
}

fn deliveries() -> impl Strategy<Value = (u16, Vec<usize>, Vec<bool>)> {
    (1u16..6).prop_flat_map(|nodes| {
        let requests = usize::from(nodes) * 2;
        (
            Just(nodes),
            Just((0..requests).collect::<Vec<_>>()).prop_shuffle(),
            proptest::collection::vec(any::<bool>(), requests),
        )
    })
}

proptest! {
    #[test]
    fn any_reply_order_converges((nodes, order, failures) in deliveries()) {
        let env = TestTransitionEnv::new(&all_down(nodes));
        let mut repo = BucketSpaceRepo::with_default_spaces(
            env.cluster_info.distribution().clone(),
            MemoryBucketDatabase::new,
        );
        let new_state = cluster_state(&format!("version:2 distributor:1 storage:{nodes}"));
        let mut pending =
            PendingClusterState::new(env.context(), &repo, Trigger::state_change(new_state)).unwrap();
        let commands = env.sender.take();
        prop_assert_eq!(commands.len(), usize::from(nodes) * 2);

        let mut was_done = pending.done();
        for index in order {
            let command = &commands[index];
            let reply = if failures[index] {
                command.reply_failed(ReplyFailure::Timeout)
            } else {
                success(command)
            };
            prop_assert!(pending.on_request_bucket_info_reply(&reply));

            let outdated = pending.outdated_node_set();
            for node in pending.request_tracker().pending_nodes() {
                prop_assert!(outdated.contains(node));
            }
            prop_assert!(!was_done || pending.done());
            was_done = pending.done();
        }
        prop_assert_eq!(pending.done(), !failures.iter().any(|failed| *failed));

        while !pending.done() {
            env.clock.advance(Duration::from_millis(100));
            pending.resend_delayed_messages();
            for command in env.sender.take() {
                prop_assert!(pending.on_request_bucket_info_reply(&success(&command)));
            }
        }

        pending.merge_into_bucket_databases(&mut repo).unwrap();
        for space in [BucketSpace::DEFAULT, BucketSpace::GLOBAL] {
            let database = repo.get(space).unwrap().database();
            prop_assert_eq!(database.len(), usize::from(nodes));
            for node in 0..nodes {
                let entry = database.get(BucketId(u64::from(node) + 1)).unwrap();
                prop_assert_eq!(entry.copies.len(), 1);
                prop_assert_eq!(entry.copies[0].node, node);
            }
        }
    }
}

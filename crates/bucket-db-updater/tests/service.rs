use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tessera_bucket_db::{BucketDatabase, BucketId, BucketSpace};
use tessera_bucket_db_memory::MemoryBucketDatabase;
use tessera_bucket_db_updater::{
    BucketDbUpdater, ChannelSender, UpdaterConfig, UpdaterError, UpdaterService,
};
use tessera_cluster_state::Distribution;
use tessera_transition::test_helpers::{ManualClock, buckets, cluster_state};
use tessera_transition::{
    BucketSpaceRepo, ClusterInformation, ReplyFailure, RequestBucketInfoCommand,
    RequestBucketInfoReply, RequestKey,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn next_command(
    commands: &mut mpsc::UnboundedReceiver<RequestBucketInfoCommand>,
) -> RequestBucketInfoCommand {
    timeout(Duration::from_secs(5), commands.recv())
        .await
        .expect("timed out waiting for a request")
        .expect("command channel closed")
}

#[tokio::test]
async fn test_service_drives_transition_to_completion() {
    init_tracing();

    let clock = Arc::new(ManualClock::new());
    let (sender, mut commands) = ChannelSender::new();
    let distribution = Arc::new(Distribution::flat(2, 3));
    let config = UpdaterConfig {
        tick_interval: Duration::from_millis(5),
        ..UpdaterConfig::default()
    };
    let updater = BucketDbUpdater::new(
        config,
        clock.clone(),
        Arc::new(sender),
        ClusterInformation::new(
            0,
            cluster_state("version:1 distributor:1 storage:3 .2.s:d"),
            distribution.clone(),
        ),
        BucketSpaceRepo::with_default_spaces(distribution, MemoryBucketDatabase::new),
    );
    let handle = UpdaterService::spawn(updater);

    handle
        .set_cluster_state(cluster_state("version:2 distributor:1 storage:3"))
        .await
        .unwrap();
    let first = next_command(&mut commands).await;
    let second = next_command(&mut commands).await;
    assert_eq!((first.node, first.bucket_space), (2, BucketSpace::DEFAULT));
    assert_eq!((second.node, second.bucket_space), (2, BucketSpace::GLOBAL));

    assert!(handle.deliver_reply(first.reply_failed(ReplyFailure::Timeout)).await.unwrap());
    assert!(handle.deliver_reply(second.reply_with(buckets(&[(9, 90)]))).await.unwrap());

    let status = handle.status().await.unwrap();
    assert_eq!(status["pending"]["delayed"].as_array().map(Vec::len), Some(1));

    clock.advance(Duration::from_millis(100));
    let resent = next_command(&mut commands).await;
    assert_eq!((resent.node, resent.bucket_space), (2, BucketSpace::DEFAULT));
    assert_ne!(resent.key, first.key);

    assert!(handle.deliver_reply(resent.reply_with(buckets(&[(4, 40)]))).await.unwrap());

    let status = handle.status().await.unwrap();
    assert!(status["pending"].is_null());
    assert_eq!(status["cluster_state"], "version:2 distributor:1 storage:3");

    let updater = handle.shutdown().await.unwrap();
    let default_db = updater.repo().get(BucketSpace::DEFAULT).unwrap().database();
    let global_db = updater.repo().get(BucketSpace::GLOBAL).unwrap().database();
    assert!(default_db.get(BucketId(4)).is_some());
    assert!(default_db.get(BucketId(9)).is_none());
    assert!(global_db.get(BucketId(9)).is_some());
    assert_eq!(updater.history().count(), 1);
}

#[tokio::test]
async fn test_service_rejects_unknown_replies_and_reports_merge_errors() {
    init_tracing();

    let (sender, _commands) = ChannelSender::new();
    let distribution = Arc::new(Distribution::flat(2, 2));
    let updater = BucketDbUpdater::new(
        UpdaterConfig::default(),
        Arc::new(ManualClock::new()),
        Arc::new(sender),
        ClusterInformation::new(0, cluster_state("version:1 distributor:1 storage:2"), distribution),
        BucketSpaceRepo::<MemoryBucketDatabase>::new(),
    );
    let handle = UpdaterService::spawn(updater);

    let stale = RequestBucketInfoReply {
        key: RequestKey::next(),
        node: 0,
        result: Ok(Vec::new()),
    };
    assert!(!handle.deliver_reply(stale).await.unwrap());

    let result = handle
        .set_cluster_state(cluster_state("version:2 distributor:1 storage:2"))
        .await;
    assert_matches!(result, Err(UpdaterError::Transition(_)));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_distribution_change_through_service() {
    init_tracing();

    let (sender, mut commands) = ChannelSender::new();
    let distribution = Arc::new(Distribution::flat(2, 2));
    let updater = BucketDbUpdater::new(
        UpdaterConfig::default(),
        Arc::new(ManualClock::new()),
        Arc::new(sender),
        ClusterInformation::new(0, cluster_state("version:7 distributor:1 storage:2"), distribution.clone()),
        BucketSpaceRepo::with_default_spaces(distribution, MemoryBucketDatabase::new),
    );
    let handle = UpdaterService::spawn(updater);

    let new_distribution = Arc::new(Distribution::flat(1, 2));
    handle.distribution_changed(new_distribution.clone()).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_command(&mut commands).await);
    }
    assert!(received.iter().all(|c| c.distribution_hash == new_distribution.config_hash()));
    for command in &received {
        assert!(handle.deliver_reply(command.reply_with(Vec::new())).await.unwrap());
    }

    let updater = handle.shutdown().await.unwrap();
    assert!(updater.pending().is_none());
    assert_eq!(updater.cluster_info().cluster_state().version(), 7);
    assert!(updater.repo().get(BucketSpace::DEFAULT).unwrap().database().is_empty());
}

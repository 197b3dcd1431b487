mod common;

use common::test_cluster::{key, shard_where, TestCluster, INDEX};
use common::test_node::uri;
use fm_cluster::{ClusterError, JobStatus, JoinOutcome, TopologyStorage, TransportError};
use fm_core::{
    ClusterState, ClusterStatus, ConstHasher, FragmentKey, JumpHasher, ModHasher, NodeEvent,
    ResizeInstructionComplete, Topology, SHARD_WIDTH,
};
use fm_storage::FragmentStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_node_starts_normal() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    assert_eq!(cluster.node(0).state(), ClusterState::Starting);

    cluster.bootstrap().await;

    let node = cluster.node(0);
    assert_eq!(node.state(), ClusterState::Normal);
    assert_eq!(node.topology().nodes(), &[uri("host0")]);
    assert!(node.is_coordinator());
    assert!(node.current_job().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_node_join_moves_shard() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.create_view();

    // Owned by host0 alone, by host1 once it joins
    let shard = shard_where(|p| p % 2 == 1);
    for col in [0, 3, 17, 4096] {
        cluster.set_bit(1, shard * SHARD_WIDTH + col).await;
    }
    let exported = cluster.node(0).store.export_fragment(&key(shard)).unwrap();

    cluster.add_node("host1").await;
    let outcome = cluster.join_and_wait(1).await;
    let JoinOutcome::Resizing(job_id) = outcome else {
        panic!("expected a resize job, got {:?}", outcome);
    };

    let job = cluster.node(0).current_job().unwrap();
    assert_eq!(job.id, job_id);
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.instruction_n, 1);
    assert_eq!(job.source_n, 1);
    assert_eq!(job.destinations, vec![uri("host1").to_string()]);

    let migrated = cluster.node(1).store.export_fragment(&key(shard)).unwrap();
    assert_eq!(migrated, exported);
    assert!(cluster.node(1).owns_shard(&uri("host1"), INDEX, shard));
    assert_eq!(cluster.node(1).owned_shards(&uri("host1"), INDEX), vec![shard]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_converges_all_nodes() {
    let mut cluster = TestCluster::new(Arc::new(JumpHasher), 2);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.create_view();
    for shard in 0..16u64 {
        cluster.set_bit(shard, shard * SHARD_WIDTH + 1).await;
        cluster.set_bit(shard + 1, shard * SHARD_WIDTH + 2).await;
    }

    for (i, host) in ["host1", "host2", "host3"].iter().enumerate() {
        cluster.add_node(host).await;
        cluster.join_and_wait(i + 1).await;
    }

    let expected = cluster.node(0).topology();
    assert_eq!(expected.len(), 4);
    for node in &cluster.nodes {
        assert_eq!(node.topology(), expected);
        assert_eq!(node.state(), ClusterState::Normal);
        assert_eq!(node.coordinator(), Some(uri("host0")));
    }

    // Every owner under the final topology holds a full replica
    for shard in 0..16u64 {
        let owners = cluster.node(0).shard_nodes(INDEX, shard);
        assert_eq!(owners.len(), 2);
        for owner in owners {
            let store = &cluster.node_by_uri(&owner).store;
            assert_eq!(
                store.bit_count(&key(shard)).unwrap(),
                2,
                "{} shard {}",
                owner,
                shard
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_migration_error_keeps_cluster_resizing() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;
    cluster.create_view();

    // Owned by host1 now and by host0 after the next join, but never written
    let missing = shard_where(|p| p % 2 == 1 && p % 3 == 0);
    // Moves to host2 after the next join
    let present = shard_where(|p| p % 3 == 2);
    cluster.announce_shard(missing);
    cluster.set_bit(7, present * SHARD_WIDTH + 7).await;
    let old_owner = cluster.node(0).shard_nodes(INDEX, present)[0].clone();
    let exported = cluster
        .node_by_uri(&old_owner)
        .store
        .export_fragment(&key(present))
        .unwrap();

    let joiner = cluster.add_node("host2").await;
    let JoinOutcome::Resizing(job_id) = cluster.join(joiner).await.unwrap() else {
        panic!("expected a resize job");
    };
    let waiter = cluster.node(joiner).wait_for_job(job_id);
    cluster.settle().await;

    let coordinator = cluster.node(0);
    let job = coordinator.current_job().unwrap();
    assert_eq!(job.status, JobStatus::Aborted);
    assert_eq!(job.instruction_n, 2);
    assert!(job.outstanding.is_empty());
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].0, uri("host0").to_string());
    assert!(!job.errors[0].1.is_empty());

    // The independent instruction still ran
    assert_eq!(
        cluster.node(joiner).store.export_fragment(&key(present)).unwrap(),
        exported
    );

    assert_eq!(coordinator.state(), ClusterState::Resizing);
    assert_eq!(coordinator.topology().len(), 2);
    assert_eq!(cluster.node(1).state(), ClusterState::Resizing);
    assert_eq!(cluster.node(joiner).state(), ClusterState::Starting);

    // A Normal status for some other job does not end this one
    let mut target = coordinator.topology();
    target.add(uri("host2"));
    let err = cluster
        .node(1)
        .receive_message(
            ClusterStatus {
                job_id: Some(job_id.wrapping_add(1)),
                state: ClusterState::Normal,
                topology: target,
            }
            .into(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::RejectedStatus { .. }));
    assert_eq!(cluster.node(1).state(), ClusterState::Resizing);
    assert_eq!(cluster.node(1).topology().len(), 2);

    let err = waiter
        .wait_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::JoinTimeout { .. }));

    let late = cluster.add_node("host3").await;
    let err = cluster.join(late).await.unwrap_err();
    assert!(matches!(
        err,
        ClusterError::ResizeInProgress { job_id: Some(id) } if id == job_id
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_job_completion_rejected() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;

    let err = cluster
        .node(0)
        .receive_message(
            ResizeInstructionComplete {
                job_id: 42,
                destination: uri("host1"),
                error: None,
            }
            .into(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::UnknownJob(42)));
    assert_eq!(cluster.node(0).state(), ClusterState::Normal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejoin_is_ready() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;

    let job = cluster.node(0).current_job().unwrap().id;
    assert_eq!(cluster.join(1).await.unwrap(), JoinOutcome::Ready);
    assert_eq!(cluster.node(0).current_job().unwrap().id, job);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_at_non_coordinator_rejected() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;

    let err = cluster
        .node(1)
        .receive_event(NodeEvent::Join(uri("host2")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::NotCoordinator { ref coordinator, .. } if *coordinator == uri("host0")
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_reloads_topology() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;
    let before = cluster.node(1).topology();

    cluster.restart_node(1).await;

    let node = cluster.node(1);
    assert!(node.data_dir.join(fm_cluster::TOPOLOGY_FILE).exists());
    assert_eq!(node.topology(), before);
    assert_eq!(node.state(), ClusterState::Normal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_const_hasher_moves_everything() {
    let mut cluster = TestCluster::new(Arc::new(ConstHasher(5)), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.create_view();
    cluster.set_bit(0, 1).await;
    cluster.set_bit(0, 3 * SHARD_WIDTH + 1).await;

    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;

    let job = cluster.node(0).current_job().unwrap();
    assert_eq!(job.instruction_n, 1);
    assert_eq!(job.source_n, 2);

    for shard in [0u64, 3] {
        assert_eq!(
            cluster.node(0).shard_nodes(INDEX, shard),
            vec![uri("host1")]
        );
        assert_eq!(
            cluster.node(1).store.export_fragment(&key(shard)).unwrap(),
            cluster.node(0).store.export_fragment(&key(shard)).unwrap()
        );
    }
    assert!(!cluster
        .node(1)
        .store
        .fragment_exists(&FragmentKey::new(INDEX, "f", "standard", 1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_status_leaves_node_untouched() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;

    let node = cluster.node(1);
    let before = node.topology();
    let waiter = node.wait_for_job(777);

    let hijack = Topology::from_nodes(vec![uri("host1"), uri("host9")]).unwrap();
    let mut grown = before.clone();
    grown.add(uri("host9"));
    let statuses = [
        (ClusterState::Starting, hijack.clone()),
        (ClusterState::Normal, hijack.clone()),
        (ClusterState::Resizing, hijack),
        (ClusterState::Normal, grown.clone()),
        (ClusterState::Resizing, grown),
    ];
    for (state, topology) in statuses {
        let err = node
            .receive_message(
                ClusterStatus {
                    job_id: Some(777),
                    state,
                    topology,
                }
                .into(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                ClusterError::InvalidTransition { .. } | ClusterError::RejectedStatus { .. }
            ),
            "{:?}",
            err
        );
    }

    assert_eq!(node.topology(), before);
    assert_eq!(node.state(), ClusterState::Normal);
    assert_eq!(node.coordinator(), Some(uri("host0")));
    assert!(!node.is_coordinator());
    let persisted = TopologyStorage::new(&node.data_dir).load().await.unwrap();
    assert_eq!(persisted, Some(before));

    let err = waiter
        .wait_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::JoinTimeout { job_id: 777, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_member_fails_join() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;
    assert!(cluster.hub.unregister(&uri("host1")));

    let joiner = cluster.add_node("host2").await;
    let err = cluster.join(joiner).await.unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Transport(TransportError::Unreachable(ref member)) if *member == uri("host1")
    ));

    let coordinator = cluster.node(0);
    assert_eq!(coordinator.state(), ClusterState::Resizing);
    assert_eq!(coordinator.topology().len(), 2);
    let job = coordinator.current_job().unwrap();
    assert_eq!(job.status, JobStatus::Aborted);
    assert_eq!(job.errors[0].0, uri("host0").to_string());

    assert_eq!(cluster.node(1).state(), ClusterState::Normal);
    assert_eq!(cluster.node(1).topology().len(), 2);
    assert_eq!(cluster.node(joiner).state(), ClusterState::Starting);
    assert!(cluster.node(joiner).topology().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_joiner_keeps_cluster_resizing() {
    let mut cluster = TestCluster::new(Arc::new(ModHasher), 1);
    cluster.add_node("host0").await;
    cluster.bootstrap().await;
    cluster.add_node("host1").await;
    cluster.join_and_wait(1).await;

    // No data, so the job has no instructions and goes straight to the
    // final status, which host2 can no longer receive
    let joiner = cluster.add_node("host2").await;
    assert!(cluster.hub.unregister(&uri("host2")));
    let err = cluster.join(joiner).await.unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Transport(TransportError::Unreachable(ref member)) if *member == uri("host2")
    ));
    cluster.settle().await;

    for i in 0..2 {
        let node = cluster.node(i);
        assert_eq!(node.state(), ClusterState::Resizing, "{}", node.uri);
        assert_eq!(node.topology().len(), 2, "{}", node.uri);
    }
    let job = cluster.node(0).current_job().unwrap();
    assert_eq!(job.status, JobStatus::Aborted);
    assert_eq!(job.instruction_n, 0);

    let late = cluster.add_node("host3").await;
    assert!(matches!(
        cluster.join(late).await,
        Err(ClusterError::ResizeInProgress { job_id: Some(id) }) if id == job.id
    ));
}

// test_cluster.rs

use crate::common::test_node::{uri, TestNode};
use fm_cluster::{ClusterError, JoinOutcome, LocalHub};
use fm_core::{partition, FragmentKey, Hasher, NodeEvent, Schema, DEFAULT_PARTITION_N};
use fm_storage::FragmentStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

pub const INDEX: &str = "i";
pub const FRAME: &str = "f";
pub const VIEW: &str = "standard";

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// First shard of `INDEX` whose partition satisfies `pred`
pub fn shard_where(pred: impl Fn(usize) -> bool) -> u64 {
    (0..100_000u64)
        .find(|&s| pred(partition(INDEX, s, DEFAULT_PARTITION_N)))
        .unwrap()
}

pub fn key(shard: u64) -> FragmentKey {
    FragmentKey::new(INDEX, FRAME, VIEW, shard)
}

pub struct TestCluster {
    pub hub: LocalHub,
    pub nodes: Vec<TestNode>,
    hasher: Arc<dyn Hasher>,
    replica_n: usize,
    dir: TempDir,
}

impl TestCluster {
    pub fn new(hasher: Arc<dyn Hasher>, replica_n: usize) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        TestCluster {
            hub: LocalHub::new(),
            nodes: Vec::new(),
            hasher,
            replica_n,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Start a node that is not yet a member
    pub async fn add_node(&mut self, host: &str) -> usize {
        let node = TestNode::start(
            &self.hub,
            self.dir.path(),
            host,
            self.hasher.clone(),
            self.replica_n,
        )
        .await;
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Replace node `i` with a fresh process over the same data directory
    pub async fn restart_node(&mut self, i: usize) {
        let host = self.nodes[i].uri.host().to_string();
        self.nodes[i].close().await.unwrap();
        self.hub.unregister(&self.nodes[i].uri);
        self.nodes[i] = TestNode::start(
            &self.hub,
            self.dir.path(),
            &host,
            self.hasher.clone(),
            self.replica_n,
        )
        .await;
    }

    pub fn node(&self, i: usize) -> &TestNode {
        &self.nodes[i]
    }

    pub fn node_by_uri(&self, uri: &fm_core::NodeUri) -> &TestNode {
        self.nodes.iter().find(|n| &n.uri == uri).unwrap()
    }

    /// The node currently acting as coordinator
    pub fn coordinator(&self) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.is_coordinator())
            .expect("no coordinator")
    }

    /// Node 0 joins itself
    pub async fn bootstrap(&self) {
        let node = self.node(0);
        let outcome = node
            .receive_event(NodeEvent::Join(node.uri.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Ready);
    }

    pub async fn join(&self, i: usize) -> Result<JoinOutcome, ClusterError> {
        let joiner = self.node(i).uri.clone();
        self.coordinator().receive_event(NodeEvent::Join(joiner)).await
    }

    /// Join node `i` and block on its waiter until the job resolves
    pub async fn join_and_wait(&self, i: usize) -> JoinOutcome {
        let outcome = self.join(i).await.unwrap();
        self.node(i)
            .wait_for_outcome(outcome, Some(JOIN_TIMEOUT))
            .await
            .unwrap();
        self.settle().await;
        info!("Node {} joined: {:?}", self.node(i).uri, outcome);
        outcome
    }

    /// Let every queued message and its follow-ups run
    pub async fn settle(&self) {
        for _ in 0..5 {
            self.hub.flush().await;
        }
    }

    pub fn create_view(&self) {
        let schema = Schema::new().with_view(INDEX, FRAME, VIEW);
        for node in &self.nodes {
            node.store.apply_schema(&schema).unwrap();
        }
    }

    /// Make a shard known everywhere without writing any data
    pub fn announce_shard(&self, shard: u64) {
        for node in &self.nodes {
            node.store.add_available_shard(&key(shard)).unwrap();
        }
    }

    /// Write a bit on every current owner of its shard
    pub async fn set_bit(&self, row: u64, column: u64) {
        let shard = column / fm_core::SHARD_WIDTH;
        for owner in self.coordinator().shard_nodes(INDEX, shard) {
            self.node_by_uri(&owner)
                .set_bit(INDEX, FRAME, VIEW, row, column)
                .await
                .unwrap();
        }
        self.settle().await;
    }
}

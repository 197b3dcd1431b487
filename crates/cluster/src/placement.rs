//! Shard placement
//!
//! A shard maps to a partition, and a partition maps to `replica_n`
//! consecutive members of the sorted topology starting at the hasher's pick.

use std::sync::Arc;

use fm_core::{partition, Hasher, NodeUri, Topology};

#[derive(Debug, Clone)]
pub struct Placement {
    nodes: Vec<NodeUri>,
    hasher: Arc<dyn Hasher>,
    replica_n: usize,
    partition_n: usize,
}

impl Placement {
    pub fn new(
        topology: &Topology,
        hasher: Arc<dyn Hasher>,
        replica_n: usize,
        partition_n: usize,
    ) -> Self {
        Self {
            nodes: topology.nodes().to_vec(),
            hasher,
            replica_n,
            partition_n,
        }
    }

    pub fn nodes(&self) -> &[NodeUri] {
        &self.nodes
    }

    pub fn partition(&self, index: &str, shard: u64) -> usize {
        partition(index, shard, self.partition_n)
    }

    /// Owners of a partition, primary first
    pub fn partition_nodes(&self, partition_id: usize) -> Vec<NodeUri> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }
        let replica_n = self.replica_n.min(n);
        let start = self.hasher.hash(partition_id as u64, n);
        (0..replica_n)
            .map(|i| self.nodes[(start + i) % n].clone())
            .collect()
    }

    pub fn shard_nodes(&self, index: &str, shard: u64) -> Vec<NodeUri> {
        self.partition_nodes(self.partition(index, shard))
    }

    pub fn owns_shard(&self, uri: &NodeUri, index: &str, shard: u64) -> bool {
        self.shard_nodes(index, shard).contains(uri)
    }

    /// Shards from `shards` that `uri` owns
    pub fn owned_shards<I>(&self, uri: &NodeUri, index: &str, shards: I) -> Vec<u64>
    where
        I: IntoIterator<Item = u64>,
    {
        shards
            .into_iter()
            .filter(|&shard| self.owns_shard(uri, index, shard))
            .collect()
    }
}

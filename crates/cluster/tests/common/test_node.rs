// test_node.rs

use fm_cluster::{Cluster, ClusterOptions, LocalHub};
use fm_core::{Hasher, NodeUri};
use fm_storage::Holder;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn uri(host: &str) -> NodeUri {
    NodeUri::from_host_port(host, 10101).unwrap()
}

/// One cluster node wired onto a local hub
#[derive(Clone)]
pub struct TestNode {
    pub uri: NodeUri,
    pub cluster: Arc<Cluster>,
    pub store: Arc<Holder>,
    pub data_dir: PathBuf,
}

impl Deref for TestNode {
    type Target = Cluster;

    fn deref(&self) -> &Self::Target {
        &self.cluster
    }
}

impl TestNode {
    /// Build, open and register a node. Its data directory is
    /// `<root>/<host>`, so rebuilding with the same host reuses it.
    pub async fn start(
        hub: &LocalHub,
        root: &Path,
        host: &str,
        hasher: Arc<dyn Hasher>,
        replica_n: usize,
    ) -> TestNode {
        let uri = uri(host);
        let data_dir = root.join(host);
        let store = Arc::new(Holder::new());
        let endpoint = hub.endpoint(uri.clone());

        let cluster = Arc::new(
            Cluster::new(
                ClusterOptions::new(uri.clone(), &data_dir).with_replica_n(replica_n),
                hasher,
                store.clone(),
                endpoint.clone(),
                endpoint,
            )
            .unwrap(),
        );
        cluster.open().await.unwrap();
        hub.register(cluster.clone(), store.clone());

        TestNode {
            uri,
            cluster,
            store,
            data_dir,
        }
    }
}

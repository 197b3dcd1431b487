//! fragmesh node runner
//!
//! Boots a set of co-located nodes on the in-process hub, writes sample bits,
//! joins the nodes one at a time and prints every node's final status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fm_cluster::{Cluster, LocalHub};
use fm_core::{HasherKind, NodeEvent, NodeUri, Schema, SHARD_WIDTH};
use fm_node::config::Config;
use fm_storage::{FragmentStore, Holder};

const DEMO_INDEX: &str = "demo";
const DEMO_FRAME: &str = "general";
const DEMO_VIEW: &str = "standard";

/// fragmesh node runner
#[derive(Parser, Debug)]
#[command(name = "fm-node")]
#[command(about = "Run co-located fragmesh nodes and rebalance them as they join")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of nodes to start
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Data storage directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Owners per shard
    #[arg(long)]
    replica_n: Option<usize>,

    /// Hasher: jump, mod or const:<i>
    #[arg(long)]
    hasher: Option<HasherKind>,

    /// Join timeout (seconds)
    #[arg(long)]
    join_timeout: Option<u64>,

    /// Sample bits written before the first join
    #[arg(long, default_value = "64")]
    bits: u64,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Override config with command line arguments
    if let Some(nodes) = args.nodes {
        config.cluster.nodes = nodes;
    }
    if let Some(data_dir) = &args.data_dir {
        config.node.data_dir = data_dir.clone();
    }
    if let Some(replica_n) = args.replica_n {
        config.cluster.replica_n = replica_n;
    }
    if let Some(hasher) = args.hasher {
        config.cluster.hasher = hasher;
    }
    if args.join_timeout.is_some() {
        config.join.timeout_secs = args.join_timeout;
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }

    // Initialize logging
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let base = config.node.node_uri()?;
    info!("Starting fragmesh nodes...");
    info!("  Nodes: {}", config.cluster.nodes);
    info!("  First node: {}", base);
    info!("  Data dir: {:?}", config.node.data_dir);
    info!("  Hasher: {}, replica_n: {}", config.cluster.hasher, config.cluster.replica_n);

    let hub = LocalHub::new();
    let hasher = config.cluster.hasher.build();
    let mut nodes: Vec<Arc<Cluster>> = Vec::new();
    for i in 0..config.cluster.nodes {
        let port = u16::try_from(i)
            .ok()
            .and_then(|i| base.port().checked_add(i))
            .context("node port out of range")?;
        let uri = NodeUri::new(base.scheme(), base.host(), port)?;
        let store = Arc::new(Holder::new());
        let endpoint = hub.endpoint(uri.clone());
        let cluster = Arc::new(Cluster::new(
            config.cluster_options(uri)?,
            hasher.clone(),
            store.clone(),
            endpoint.clone(),
            endpoint,
        )?);
        cluster.open().await?;
        hub.register(cluster.clone(), store);
        nodes.push(cluster);
    }
    let by_uri: HashMap<NodeUri, Arc<Cluster>> =
        nodes.iter().map(|n| (n.uri().clone(), n.clone())).collect();

    let Some(first) = nodes.first().cloned() else {
        anyhow::bail!("no nodes configured");
    };

    let outcome = first
        .receive_event(NodeEvent::Join(first.uri().clone()))
        .await?;
    first.wait_for_outcome(outcome, config.join.timeout()).await?;

    // Sample data, written on each shard's current owners
    first
        .store()
        .apply_schema(&Schema::new().with_view(DEMO_INDEX, DEMO_FRAME, DEMO_VIEW))?;
    for k in 0..args.bits {
        let column = k * (SHARD_WIDTH / 4) + k;
        for owner in first.shard_nodes(DEMO_INDEX, column / SHARD_WIDTH) {
            if let Some(node) = by_uri.get(&owner) {
                node.set_bit(DEMO_INDEX, DEMO_FRAME, DEMO_VIEW, k % 8, column)
                    .await?;
            }
        }
    }
    hub.flush().await;
    info!("Wrote {} sample bits", args.bits);

    for node in nodes.iter().skip(1) {
        let coordinator = nodes
            .iter()
            .find(|n| n.is_coordinator())
            .context("no coordinator")?;
        let outcome = coordinator
            .receive_event(NodeEvent::Join(node.uri().clone()))
            .await?;
        node.wait_for_outcome(outcome, config.join.timeout())
            .await
            .with_context(|| format!("join of {}", node.uri()))?;
        hub.flush().await;
        info!("{} joined ({:?})", node.uri(), outcome);
    }

    let reports: Vec<_> = nodes.iter().map(|n| n.report()).collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);

    for node in &nodes {
        node.close().await?;
    }
    hub.shutdown();
    Ok(())
}

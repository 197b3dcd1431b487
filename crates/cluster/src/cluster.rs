//! Per-node cluster state machine
//!
//! State transitions:
//! - `Starting -> Normal`: open finds the local node in the persisted
//!   topology, the first node joins itself, or a joining node applies the
//!   `ClusterStatus{Normal}` of its job
//! - `Normal -> Resizing`: the coordinator accepts a join into a non-empty
//!   cluster; the other members follow when the coordinator announces the job
//! - `Resizing -> Normal`: a `ClusterStatus{Normal}` for the active job is
//!   applied
//!
//! A `ClusterStatus` is checked in full before any of it is applied. A
//! rejected status leaves topology, state and waiters untouched.
//!
//! Incoming messages and join events are handled one at a time per node.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use fm_core::{
    ClusterState, ClusterStatus, CreateShard, FragmentKey, Hasher, JobId, Message, NodeEvent,
    NodeUri, ResizeInstruction, ResizeInstructionComplete, Topology, DEFAULT_PARTITION_N,
    SHARD_WIDTH,
};
use fm_storage::FragmentStore;

use crate::error::{ClusterError, Result};
use crate::placement::Placement;
use crate::resize::{resize_instructions, FragmentMigrator, JobProgress, JobSummary, JobTracker};
use crate::storage::TopologyStorage;
use crate::transport::{Broadcaster, FragmentClient, MessageHandler};
use crate::waiter::{JobWaiter, JobWaiters};

/// Library-level cluster configuration
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Address of the local node
    pub uri: NodeUri,
    /// Directory holding the `.topology` file
    pub data_dir: PathBuf,
    /// Owners per shard
    pub replica_n: usize,
    /// Partitions shards are hashed into
    pub partition_n: usize,
}

impl ClusterOptions {
    pub fn new(uri: NodeUri, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            uri,
            data_dir: data_dir.into(),
            replica_n: 1,
            partition_n: DEFAULT_PARTITION_N,
        }
    }

    pub fn with_replica_n(mut self, replica_n: usize) -> Self {
        self.replica_n = replica_n;
        self
    }

    pub fn with_partition_n(mut self, partition_n: usize) -> Self {
        self.partition_n = partition_n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_n == 0 {
            return Err(ClusterError::InvalidConfig(
                "replica_n must be at least 1".to_string(),
            ));
        }
        if self.partition_n == 0 {
            return Err(ClusterError::InvalidConfig(
                "partition_n must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a join event at the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Nothing to wait for: the node is already a member or is the first one
    Ready,
    /// A resize job was started; wait for it on the joining node
    Resizing(JobId),
}

/// Status snapshot of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub uri: String,
    pub state: ClusterState,
    pub coordinator: Option<String>,
    pub topology: Vec<String>,
    /// Owned shards per index
    pub shards: BTreeMap<String, Vec<u64>>,
    pub job: Option<JobSummary>,
}

struct ClusterInner {
    topology: Topology,
    state: ClusterState,
    /// Resize job this node is `Resizing` for
    active_job: Option<JobId>,
}

fn can_transition(from: ClusterState, to: ClusterState) -> bool {
    use ClusterState::*;
    from == to || matches!((from, to), (Starting, Normal) | (Normal, Resizing) | (Resizing, Normal))
}

/// One node's view of the cluster
pub struct Cluster {
    options: ClusterOptions,
    hasher: Arc<dyn Hasher>,
    store: Arc<dyn FragmentStore>,
    broadcaster: Arc<dyn Broadcaster>,
    migrator: FragmentMigrator,
    storage: TopologyStorage,
    inner: RwLock<ClusterInner>,
    jobs: JobTracker,
    waiters: JobWaiters,
    /// Serializes join events and message handling
    handler_lock: Mutex<()>,
}

impl Cluster {
    pub fn new(
        options: ClusterOptions,
        hasher: Arc<dyn Hasher>,
        store: Arc<dyn FragmentStore>,
        broadcaster: Arc<dyn Broadcaster>,
        client: Arc<dyn FragmentClient>,
    ) -> Result<Self> {
        options.validate()?;
        let storage = TopologyStorage::new(&options.data_dir);
        let migrator = FragmentMigrator::new(store.clone(), client);
        Ok(Self {
            options,
            hasher,
            store,
            broadcaster,
            migrator,
            storage,
            inner: RwLock::new(ClusterInner {
                topology: Topology::new(),
                state: ClusterState::Starting,
                active_job: None,
            }),
            jobs: JobTracker::new(),
            waiters: JobWaiters::new(),
            handler_lock: Mutex::new(()),
        })
    }

    pub fn uri(&self) -> &NodeUri {
        &self.options.uri
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn FragmentStore> {
        &self.store
    }

    pub fn state(&self) -> ClusterState {
        self.inner.read().state
    }

    pub fn topology(&self) -> Topology {
        self.inner.read().topology.clone()
    }

    pub fn coordinator(&self) -> Option<NodeUri> {
        self.inner.read().topology.coordinator().cloned()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator().as_ref() == Some(self.uri())
    }

    /// Load the persisted topology. A node that finds itself in it is
    /// immediately `Normal`; otherwise it stays `Starting` until it joins.
    pub async fn open(&self) -> Result<()> {
        self.storage.ensure_dir().await?;
        let loaded = self.storage.load().await?;

        let mut inner = self.inner.write();
        if let Some(topology) = loaded {
            inner.topology = topology;
        }
        if inner.topology.contains(self.uri()) {
            Self::transition(&mut inner, self.uri(), ClusterState::Normal)?;
        }
        info!(
            "Opened cluster node {}: state {}, {} members",
            self.uri(),
            inner.state,
            inner.topology.len()
        );
        Ok(())
    }

    /// Drop waiters and job records. Blocked join callers see `Closed`.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.handler_lock.lock().await;
        self.waiters.clear();
        self.jobs.clear();
        info!("Closed cluster node {}", self.uri());
        Ok(())
    }

    fn transition(inner: &mut ClusterInner, uri: &NodeUri, to: ClusterState) -> Result<()> {
        let from = inner.state;
        if !can_transition(from, to) {
            return Err(ClusterError::InvalidTransition { from, to });
        }
        if from != to {
            info!("{} state {} -> {}", uri, from, to);
        }
        inner.state = to;
        Ok(())
    }

    fn placement_for(&self, topology: &Topology) -> Placement {
        Placement::new(
            topology,
            self.hasher.clone(),
            self.options.replica_n,
            self.options.partition_n,
        )
    }

    /// Placement under the current topology
    pub fn placement(&self) -> Placement {
        self.placement_for(&self.inner.read().topology)
    }

    pub fn partition(&self, index: &str, shard: u64) -> usize {
        fm_core::partition(index, shard, self.options.partition_n)
    }

    pub fn partition_nodes(&self, partition_id: usize) -> Vec<NodeUri> {
        self.placement().partition_nodes(partition_id)
    }

    pub fn shard_nodes(&self, index: &str, shard: u64) -> Vec<NodeUri> {
        self.placement().shard_nodes(index, shard)
    }

    pub fn owns_shard(&self, uri: &NodeUri, index: &str, shard: u64) -> bool {
        self.placement().owns_shard(uri, index, shard)
    }

    /// Available shards of `index` that `uri` owns
    pub fn owned_shards(&self, uri: &NodeUri, index: &str) -> Vec<u64> {
        let schema = self.store.schema();
        let mut shards: Vec<u64> = schema
            .index(index)
            .map(|is| {
                is.frames
                    .values()
                    .flat_map(|f| f.views.values())
                    .flat_map(|v| v.shards.iter().copied())
                    .collect()
            })
            .unwrap_or_default();
        shards.sort_unstable();
        shards.dedup();
        self.placement().owned_shards(uri, index, shards)
    }

    /// Create a local fragment. A shard new to this node's schema is
    /// announced to the other members.
    pub async fn create_fragment(&self, key: &FragmentKey) -> Result<bool> {
        let new_shard = self.store.add_available_shard(key)?;
        let created = self.store.create_fragment_if_not_exists(key)?;
        if new_shard {
            debug!("{} announcing new shard {}", self.uri(), key);
            self.broadcaster
                .send_async(CreateShard { key: key.clone() }.into())
                .await;
        }
        Ok(created)
    }

    /// Set a bit locally, creating its fragment if needed
    pub async fn set_bit(
        &self,
        index: &str,
        frame: &str,
        view: &str,
        row: u64,
        column: u64,
    ) -> Result<bool> {
        let key = FragmentKey::new(index, frame, view, column / SHARD_WIDTH);
        self.create_fragment(&key).await?;
        Ok(self.store.set_bit(&key, row, column)?)
    }

    /// Handle a membership event. Only the acting coordinator accepts joins.
    pub async fn receive_event(&self, event: NodeEvent) -> Result<JoinOutcome> {
        let _guard = self.handler_lock.lock().await;
        match event {
            NodeEvent::Join(uri) => self.node_join(uri).await,
        }
    }

    async fn node_join(&self, uri: NodeUri) -> Result<JoinOutcome> {
        let (topology, state) = {
            let inner = self.inner.read();
            (inner.topology.clone(), inner.state)
        };

        let Some(coordinator) = topology.coordinator().cloned() else {
            // First member: only a node may bootstrap itself
            if &uri != self.uri() {
                return Err(ClusterError::NotReady(state));
            }
            let mut topology = Topology::new();
            topology.add(uri);
            self.storage.save(&topology).await?;
            let mut inner = self.inner.write();
            inner.topology = topology;
            Self::transition(&mut inner, self.uri(), ClusterState::Normal)?;
            info!("{} bootstrapped a single-node cluster", self.uri());
            return Ok(JoinOutcome::Ready);
        };

        if &coordinator != self.uri() {
            return Err(ClusterError::NotCoordinator {
                local: self.uri().clone(),
                coordinator,
            });
        }
        if topology.contains(&uri) {
            debug!("{} is already a member", uri);
            return Ok(JoinOutcome::Ready);
        }
        if state == ClusterState::Resizing || self.jobs.running().is_some() {
            let job_id = self
                .inner
                .read()
                .active_job
                .or_else(|| self.jobs.running())
                .or_else(|| self.jobs.latest_id());
            warn!("Rejecting join of {}: resize job {:?} outstanding", uri, job_id);
            return Err(ClusterError::ResizeInProgress { job_id });
        }
        if state != ClusterState::Normal {
            return Err(ClusterError::NotReady(state));
        }

        let mut new_topology = topology.clone();
        new_topology.add(uri.clone());

        let job_id = self.jobs.next_id();
        let instructions = resize_instructions(
            job_id,
            self.uri(),
            &self.placement_for(&topology),
            &self.placement_for(&new_topology),
            &self.store.schema(),
        );

        {
            let mut inner = self.inner.write();
            Self::transition(&mut inner, self.uri(), ClusterState::Resizing)?;
            inner.active_job = Some(job_id);
        }
        let summary = self
            .jobs
            .start(job_id, uri.clone(), new_topology.clone(), &instructions);
        info!(
            "Job {}: {} joining, {} instructions, {} sources",
            job_id, uri, summary.instruction_n, summary.source_n
        );

        // Current members enter Resizing for this job before any data moves
        let announce = ClusterStatus {
            job_id: Some(job_id),
            state: ClusterState::Resizing,
            topology: topology.clone(),
        };
        if let Err(e) = self
            .broadcaster
            .send_sync(topology.nodes(), announce.into())
            .await
        {
            error!("Job {}: could not announce resize: {}", job_id, e);
            self.abort_job(job_id, e.to_string());
            return Err(e.into());
        }

        if instructions.is_empty() {
            self.finish_job(job_id, new_topology).await?;
            return Ok(JoinOutcome::Resizing(job_id));
        }

        for instruction in instructions {
            let destination = instruction.destination.clone();
            debug!(
                "Job {}: sending {} sources to {}",
                job_id,
                instruction.sources.len(),
                destination
            );
            if let Err(e) = self.broadcaster.send_to(&destination, instruction.into()).await {
                warn!("Job {}: could not deliver instruction to {}: {}", job_id, destination, e);
                self.apply_completion(ResizeInstructionComplete {
                    job_id,
                    destination,
                    error: Some(e.to_string()),
                })
                .await?;
            }
        }
        Ok(JoinOutcome::Resizing(job_id))
    }

    /// Handle one message delivered by the transport
    pub async fn receive_message(&self, message: Message) -> Result<()> {
        let _guard = self.handler_lock.lock().await;
        debug!("{} handling {}", self.uri(), message.kind());
        match message {
            Message::ClusterStatus(status) => self.merge_cluster_status(status).await,
            Message::ResizeInstruction(instruction) => {
                self.follow_resize_instruction(instruction).await
            }
            Message::ResizeInstructionComplete(complete) => self.apply_completion(complete).await,
            Message::CreateShard(create) => {
                if self.store.add_available_shard(&create.key)? {
                    debug!("{} learned shard {}", self.uri(), create.key);
                }
                Ok(())
            }
        }
    }

    async fn merge_cluster_status(&self, status: ClusterStatus) -> Result<()> {
        if !status.topology.contains(self.uri()) {
            debug!(
                "{} ignoring cluster status for a topology it is not part of",
                self.uri()
            );
            return Ok(());
        }

        let changed = {
            let inner = self.inner.read();
            if let Err(e) = Self::check_status(&inner, &status) {
                warn!("{} rejected cluster status: {}", self.uri(), e);
                return Err(e);
            }
            inner.topology != status.topology
        };
        if changed {
            self.storage.save(&status.topology).await?;
        }
        {
            let mut inner = self.inner.write();
            inner.topology = status.topology;
            Self::transition(&mut inner, self.uri(), status.state)?;
            inner.active_job = match status.state {
                ClusterState::Resizing => status.job_id,
                _ => None,
            };
        }

        if status.state == ClusterState::Normal {
            if let Some(job_id) = status.job_id {
                let woken = self.waiters.fulfill(job_id);
                debug!("{} resolved job {}, woke {} waiters", self.uri(), job_id, woken);
            }
        }
        Ok(())
    }

    /// Whether `status` may be applied on top of `inner`
    fn check_status(inner: &ClusterInner, status: &ClusterStatus) -> Result<()> {
        use ClusterState::*;
        let reject = |reason: &'static str| ClusterError::RejectedStatus {
            job_id: status.job_id,
            reason,
        };

        if !can_transition(inner.state, status.state) {
            return Err(ClusterError::InvalidTransition {
                from: inner.state,
                to: status.state,
            });
        }
        if status.state == Starting {
            return Err(reject("starting is never broadcast"));
        }
        if !status.topology.is_superset_of(&inner.topology) {
            return Err(reject("topology drops current members"));
        }

        match (inner.state, status.state) {
            (Normal, Resizing) => {
                if status.job_id.is_none() {
                    return Err(reject("resize without a job"));
                }
                if status.topology != inner.topology {
                    return Err(reject("resize announced for a different topology"));
                }
            }
            (Resizing, to) => {
                if status.job_id.is_none() || status.job_id != inner.active_job {
                    return Err(reject("not the job this node is resizing for"));
                }
                if to == Resizing && status.topology != inner.topology {
                    return Err(reject("resize announced for a different topology"));
                }
            }
            (Normal, Normal) => {
                if status.topology != inner.topology {
                    return Err(reject("membership change outside a resize job"));
                }
            }
            // A joining node learns the cluster it was admitted to
            _ => {}
        }
        Ok(())
    }

    async fn follow_resize_instruction(&self, instruction: ResizeInstruction) -> Result<()> {
        if &instruction.destination != self.uri() {
            return Err(ClusterError::MisroutedInstruction {
                destination: instruction.destination,
                local: self.uri().clone(),
            });
        }

        let error = match self.migrator.follow(&instruction).await {
            Ok(_) => None,
            Err(e) => {
                warn!("Job {}: migration on {} failed: {}", instruction.job_id, self.uri(), e);
                Some(e.to_string())
            }
        };

        let complete = ResizeInstructionComplete {
            job_id: instruction.job_id,
            destination: self.uri().clone(),
            error,
        };
        self.broadcaster
            .send_to(&instruction.coordinator, complete.into())
            .await?;
        Ok(())
    }

    async fn apply_completion(&self, complete: ResizeInstructionComplete) -> Result<()> {
        if let Some(e) = &complete.error {
            error!(
                "Job {}: destination {} reported error: {}",
                complete.job_id, complete.destination, e
            );
        }

        let job_id = complete.job_id;
        match self.jobs.complete(&complete)? {
            JobProgress::Pending { remaining } => {
                debug!("Job {}: {} destinations outstanding", job_id, remaining);
                Ok(())
            }
            JobProgress::Done { topology } => self.finish_job(job_id, topology).await,
            JobProgress::Aborted { errors } => {
                error!(
                    "Job {} aborted with {} failed destinations; cluster stays {}",
                    job_id,
                    errors.len(),
                    self.state()
                );
                self.jobs.cleanup(0);
                Ok(())
            }
        }
    }

    /// Record a failure outside any destination. The cluster stays
    /// `Resizing`, as for a failed migration.
    fn abort_job(&self, job_id: JobId, error: String) {
        self.jobs.fail(job_id, self.uri().clone(), error);
        self.jobs.cleanup(0);
    }

    /// Tell every member of the job's topology, then persist it and go
    /// `Normal`. If a member cannot be told, the job aborts.
    async fn finish_job(&self, job_id: JobId, topology: Topology) -> Result<()> {
        let status = ClusterStatus {
            job_id: Some(job_id),
            state: ClusterState::Normal,
            topology: topology.clone(),
        };
        if let Err(e) = self
            .broadcaster
            .send_sync(topology.nodes(), status.into())
            .await
        {
            error!(
                "Job {}: status broadcast failed, cluster stays {}: {}",
                job_id,
                self.state(),
                e
            );
            self.abort_job(job_id, e.to_string());
            return Err(e.into());
        }

        self.storage.save(&topology).await?;
        {
            let mut inner = self.inner.write();
            inner.topology = topology.clone();
            Self::transition(&mut inner, self.uri(), ClusterState::Normal)?;
            inner.active_job = None;
        }
        info!("Job {} complete: {} members", job_id, topology.len());
        self.jobs.cleanup(0);
        self.waiters.fulfill(job_id);
        Ok(())
    }

    /// Waiter for `job_id` on this node
    pub fn wait_for_job(&self, job_id: JobId) -> JobWaiter {
        self.waiters.register(job_id)
    }

    /// Block on a join outcome, optionally with a deadline
    pub async fn wait_for_outcome(
        &self,
        outcome: JoinOutcome,
        timeout: Option<Duration>,
    ) -> Result<()> {
        match outcome {
            JoinOutcome::Ready => Ok(()),
            JoinOutcome::Resizing(job_id) => {
                let waiter = self.wait_for_job(job_id);
                match timeout {
                    Some(after) => waiter.wait_timeout(after).await,
                    None => waiter.wait().await,
                }
            }
        }
    }

    /// Summary of the most recent resize job this node coordinated
    pub fn current_job(&self) -> Option<JobSummary> {
        self.jobs.latest()
    }

    pub fn report(&self) -> NodeReport {
        let (topology, state) = {
            let inner = self.inner.read();
            (inner.topology.clone(), inner.state)
        };
        let shards = self
            .store
            .schema()
            .indexes
            .keys()
            .map(|index| (index.clone(), self.owned_shards(self.uri(), index)))
            .collect();
        NodeReport {
            uri: self.uri().to_string(),
            state,
            coordinator: topology.coordinator().map(|c| c.to_string()),
            topology: topology.nodes().iter().map(|n| n.to_string()).collect(),
            shards,
            job: self.current_job(),
        }
    }
}

#[async_trait]
impl MessageHandler for Cluster {
    fn uri(&self) -> &NodeUri {
        &self.options.uri
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        self.receive_message(message).await
    }
}

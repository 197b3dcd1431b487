//! Cluster error types

use std::time::Duration;

use fm_core::{ClusterState, JobId, NodeUri, TopologyError};
use fm_storage::StoreError;

use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("topology storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("fragment store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: ClusterState, to: ClusterState },

    #[error("{local} is not the coordinator (coordinator is {coordinator})")]
    NotCoordinator { local: NodeUri, coordinator: NodeUri },

    #[error("cluster not ready: state is {0}")]
    NotReady(ClusterState),

    #[error("resize already in progress (job {job_id:?})")]
    ResizeInProgress { job_id: Option<JobId> },

    #[error("rejected cluster status for job {job_id:?}: {reason}")]
    RejectedStatus {
        job_id: Option<JobId>,
        reason: &'static str,
    },

    #[error("unknown resize job: {0}")]
    UnknownJob(JobId),

    #[error("unexpected completion for job {job_id} from {destination}")]
    UnexpectedCompletion { job_id: JobId, destination: NodeUri },

    #[error("instruction for {destination} delivered to {local}")]
    MisroutedInstruction { destination: NodeUri, local: NodeUri },

    #[error("job {job_id} did not resolve within {after:?}")]
    JoinTimeout { job_id: JobId, after: Duration },

    #[error("cluster closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClusterError>;

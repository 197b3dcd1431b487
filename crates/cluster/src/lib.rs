//! Cluster membership and resize coordination
//!
//! Each node runs one `Cluster`. The lowest-ordered member of the topology
//! acts as coordinator: it accepts joins, plans which fragments must move,
//! sends one `ResizeInstruction` per destination and broadcasts the final
//! `ClusterStatus` once every destination has reported back.
//!
//! Transports plug in through `Broadcaster` and `FragmentClient`;
//! `LocalHub` wires co-located nodes together in one process.

pub mod cluster;
pub mod error;
pub mod placement;
pub mod resize;
pub mod storage;
pub mod transport;
pub mod waiter;

pub use cluster::{Cluster, ClusterOptions, JoinOutcome, NodeReport};
pub use error::{ClusterError, Result};
pub use placement::Placement;
pub use resize::{FragmentMigrator, JobStatus, JobSummary, JobTracker, MigrationError};
pub use storage::{StorageError, TopologyStorage, TOPOLOGY_FILE};
pub use transport::{
    Broadcaster, FragmentClient, LocalEndpoint, LocalHub, MessageHandler, TransportError,
};
pub use waiter::{JobWaiter, JobWaiters};

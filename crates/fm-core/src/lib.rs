//! Core membership and placement vocabulary
//!
//! Provides the types every node of a fragmesh cluster must agree on:
//! - Node addressing (`NodeUri`) and its total order
//! - Key to owner-index hashing strategies (`Hasher`)
//! - Ordered, deduplicated membership (`Topology`)
//! - Schema snapshots shipped with resize instructions
//! - Cross-node wire messages and their codec

pub mod codec;
pub mod hasher;
pub mod message;
pub mod schema;
pub mod topology;
pub mod uri;

// Re-export commonly used types
pub use codec::CodecError;
pub use hasher::{
    partition, ConstHasher, Hasher, HasherKind, JumpHasher, ModHasher, DEFAULT_PARTITION_N,
};
pub use message::{
    ClusterState, ClusterStatus, CreateShard, JobId, Message, NodeEvent, ResizeInstruction,
    ResizeInstructionComplete, ResizeSource,
};
pub use schema::{
    validate_name, FragmentKey, FrameSchema, IndexSchema, Schema, SchemaError, ViewSchema,
    SHARD_WIDTH,
};
pub use topology::{coordinator, Topology, TopologyError};
pub use uri::{NodeUri, UriError};

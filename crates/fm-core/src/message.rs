//! Cross-node messages
//!
//! These are the only contracts nodes share on the wire. Transports move
//! `Message` values, or their encoded bytes, between nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{self, CodecError};
use crate::schema::{FragmentKey, Schema};
use crate::topology::Topology;
use crate::uri::NodeUri;

/// Resize job identifier
pub type JobId = u64;

/// Cluster state as seen by one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    /// Node is not serving yet
    Starting,
    /// A resize job is outstanding
    Resizing,
    /// Ownership matches the topology
    Normal,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Starting => write!(f, "STARTING"),
            ClusterState::Resizing => write!(f, "RESIZING"),
            ClusterState::Normal => write!(f, "NORMAL"),
        }
    }
}

/// Coordinator to all: terminal message of a resize job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Job this status resolves, if any
    pub job_id: Option<JobId>,
    pub state: ClusterState,
    pub topology: Topology,
}

/// Where to pull one fragment from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeSource {
    pub owner: NodeUri,
    pub index: String,
    pub frame: String,
    pub view: String,
    pub shard: u64,
}

impl ResizeSource {
    pub fn new(owner: NodeUri, key: FragmentKey) -> Self {
        Self {
            owner,
            index: key.index,
            frame: key.frame,
            view: key.view,
            shard: key.shard,
        }
    }

    pub fn fragment_key(&self) -> FragmentKey {
        FragmentKey::new(&self.index, &self.frame, &self.view, self.shard)
    }
}

/// Coordinator to one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeInstruction {
    pub job_id: JobId,
    pub destination: NodeUri,
    pub coordinator: NodeUri,
    pub schema: Schema,
    pub sources: Vec<ResizeSource>,
}

/// Destination to coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeInstructionComplete {
    pub job_id: JobId,
    pub destination: NodeUri,
    /// Set when the instruction failed; migration stopped at that source
    pub error: Option<String>,
}

/// A node created a fragment for a shard its schema did not list yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShard {
    pub key: FragmentKey,
}

/// Membership input consumed by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    Join(NodeUri),
}

impl NodeEvent {
    pub fn uri(&self) -> &NodeUri {
        match self {
            NodeEvent::Join(uri) => uri,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    ClusterStatus(ClusterStatus),
    ResizeInstruction(ResizeInstruction),
    ResizeInstructionComplete(ResizeInstructionComplete),
    CreateShard(CreateShard),
}

impl Message {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClusterStatus(_) => "ClusterStatus",
            Message::ResizeInstruction(_) => "ResizeInstruction",
            Message::ResizeInstructionComplete(_) => "ResizeInstructionComplete",
            Message::CreateShard(_) => "CreateShard",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

impl From<ClusterStatus> for Message {
    fn from(m: ClusterStatus) -> Self {
        Message::ClusterStatus(m)
    }
}

impl From<ResizeInstruction> for Message {
    fn from(m: ResizeInstruction) -> Self {
        Message::ResizeInstruction(m)
    }
}

impl From<ResizeInstructionComplete> for Message {
    fn from(m: ResizeInstructionComplete) -> Self {
        Message::ResizeInstructionComplete(m)
    }
}

impl From<CreateShard> for Message {
    fn from(m: CreateShard) -> Self {
        Message::CreateShard(m)
    }
}

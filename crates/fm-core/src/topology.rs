//! Cluster membership
//!
//! The topology is the sorted, duplicate-free list of member addresses. The
//! coordinator is derived from it rather than elected: whoever sorts first.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::uri::NodeUri;

/// Topology error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("duplicate node in topology: {0}")]
    DuplicateNode(NodeUri),
    #[error("topology codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Ordered set of member addresses
///
/// Decoding goes through `from_nodes`, so a persisted or received snapshot
/// that is unsorted or contains duplicates is rejected or normalized the same
/// way a freshly built one would be.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<NodeUri>", into = "Vec<NodeUri>")]
pub struct Topology {
    node_set: Vec<NodeUri>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a topology from addresses in any order.
    pub fn from_nodes<I>(nodes: I) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = NodeUri>,
    {
        let mut node_set: Vec<NodeUri> = nodes.into_iter().collect();
        node_set.sort();
        if let Some(pair) = node_set.windows(2).find(|w| w[0] == w[1]) {
            return Err(TopologyError::DuplicateNode(pair[0].clone()));
        }
        Ok(Self { node_set })
    }

    pub fn nodes(&self) -> &[NodeUri] {
        &self.node_set
    }

    pub fn len(&self) -> usize {
        self.node_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_set.is_empty()
    }

    pub fn contains(&self, uri: &NodeUri) -> bool {
        self.node_set.binary_search(uri).is_ok()
    }

    /// Insert keeping sort order. Returns false if already a member.
    pub fn add(&mut self, uri: NodeUri) -> bool {
        match self.node_set.binary_search(&uri) {
            Ok(_) => false,
            Err(pos) => {
                self.node_set.insert(pos, uri);
                true
            }
        }
    }

    /// True if every member of `other` is also a member here
    pub fn is_superset_of(&self, other: &Topology) -> bool {
        other.node_set.iter().all(|uri| self.contains(uri))
    }

    /// Lowest-ordered member
    pub fn coordinator(&self) -> Option<&NodeUri> {
        self.node_set.first()
    }

    pub fn encode(&self) -> Result<Vec<u8>, TopologyError> {
        Ok(codec::encode(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TopologyError> {
        Ok(codec::decode(bytes)?)
    }
}

/// Coordinator of a topology. Every node that holds the same topology
/// computes the same answer.
pub fn coordinator(topology: &Topology) -> Option<&NodeUri> {
    topology.coordinator()
}

impl TryFrom<Vec<NodeUri>> for Topology {
    type Error = TopologyError;

    fn try_from(nodes: Vec<NodeUri>) -> Result<Self, Self::Error> {
        Self::from_nodes(nodes)
    }
}

impl From<Topology> for Vec<NodeUri> {
    fn from(topology: Topology) -> Self {
        topology.node_set
    }
}

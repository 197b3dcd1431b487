//! Message delivery between nodes
//!
//! The cluster only sees these traits, so the same state machine runs over an
//! in-process hub or a network transport.

mod local;

pub use local::{LocalEndpoint, LocalHub};

use async_trait::async_trait;
use bytes::Bytes;

use fm_core::{FragmentKey, Message, NodeUri};

use crate::error::Result;

/// Transport error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("node unreachable: {0}")]
    Unreachable(NodeUri),
    #[error("mailbox of {0} is closed")]
    Closed(NodeUri),
    #[error("remote error: {0}")]
    Remote(String),
}

/// Cluster-wide and point-to-point delivery
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver to every member other than the sender and return once all of
    /// them applied it. The sender applies the message itself. A member that
    /// cannot be reached fails the whole call.
    async fn send_sync(
        &self,
        members: &[NodeUri],
        message: Message,
    ) -> std::result::Result<(), TransportError>;

    /// Fire and forget to every other member. Failures are dropped.
    async fn send_async(&self, message: Message);

    /// Unicast to one node, which may be the sender.
    /// Returns once the message is queued at the destination.
    async fn send_to(
        &self,
        destination: &NodeUri,
        message: Message,
    ) -> std::result::Result<(), TransportError>;
}

/// Pulls fragment exports from their owners
#[async_trait]
pub trait FragmentClient: Send + Sync {
    async fn retrieve_fragment(
        &self,
        owner: &NodeUri,
        key: &FragmentKey,
    ) -> std::result::Result<Bytes, TransportError>;
}

/// Receiving side of a transport
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn uri(&self) -> &NodeUri;

    async fn handle_message(&self, message: Message) -> Result<()>;
}

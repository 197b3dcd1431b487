//! In-process transport
//!
//! Every registered node gets an unbounded mailbox drained by one task, so a
//! node handles its messages one at a time while different nodes run
//! concurrently. Fragment exports bypass the mailbox and read the owner's
//! store directly.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use fm_core::{FragmentKey, Message, NodeUri};
use fm_storage::FragmentStore;

use super::{Broadcaster, FragmentClient, MessageHandler, TransportError};

type Ack = oneshot::Sender<Result<(), String>>;

enum Envelope {
    Deliver { message: Message, ack: Option<Ack> },
    Barrier(oneshot::Sender<()>),
}

struct NodeEntry {
    mailbox: mpsc::UnboundedSender<Envelope>,
    store: Arc<dyn FragmentStore>,
}

/// Registry of co-located nodes
#[derive(Clone, Default)]
pub struct LocalHub {
    nodes: Arc<RwLock<HashMap<NodeUri, NodeEntry>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sending side for `uri`. Usable before `uri` is registered.
    pub fn endpoint(&self, uri: NodeUri) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            uri,
            hub: self.clone(),
        })
    }

    /// Register a node and spawn its mailbox task. Replaces any previous
    /// registration for the same address.
    pub fn register(&self, handler: Arc<dyn MessageHandler>, store: Arc<dyn FragmentStore>) {
        let uri = handler.uri().clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let task_uri = uri.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Deliver { message, ack } => {
                        let kind = message.kind();
                        let result = handler
                            .handle_message(message)
                            .await
                            .map_err(|e| e.to_string());
                        if let Err(e) = &result {
                            warn!("{} failed to handle {}: {}", task_uri, kind, e);
                        }
                        if let Some(ack) = ack {
                            let _ = ack.send(result);
                        }
                    }
                    Envelope::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Mailbox of {} closed", task_uri);
        });

        self.nodes.write().insert(
            uri.clone(),
            NodeEntry {
                mailbox: tx,
                store,
            },
        );
        debug!("Registered {} on local hub", uri);
    }

    /// Drop a node's mailbox. Queued messages are still handled.
    pub fn unregister(&self, uri: &NodeUri) -> bool {
        self.nodes.write().remove(uri).is_some()
    }

    /// Registered addresses, sorted
    pub fn members(&self) -> Vec<NodeUri> {
        let mut members: Vec<NodeUri> = self.nodes.read().keys().cloned().collect();
        members.sort();
        members
    }

    /// Wait until every mailbox has drained what was queued before this call
    pub async fn flush(&self) {
        let barriers: Vec<oneshot::Receiver<()>> = {
            let nodes = self.nodes.read();
            nodes
                .values()
                .filter_map(|entry| {
                    let (tx, rx) = oneshot::channel();
                    entry.mailbox.send(Envelope::Barrier(tx)).ok().map(|_| rx)
                })
                .collect()
        };
        for barrier in barriers {
            let _ = barrier.await;
        }
    }

    pub fn shutdown(&self) {
        self.nodes.write().clear();
    }

    fn mailbox(&self, uri: &NodeUri) -> Option<mpsc::UnboundedSender<Envelope>> {
        self.nodes.read().get(uri).map(|e| e.mailbox.clone())
    }

    fn store(&self, uri: &NodeUri) -> Option<Arc<dyn FragmentStore>> {
        self.nodes.read().get(uri).map(|e| e.store.clone())
    }

    fn peers(&self, uri: &NodeUri) -> Vec<(NodeUri, mpsc::UnboundedSender<Envelope>)> {
        self.nodes
            .read()
            .iter()
            .filter(|(peer, _)| *peer != uri)
            .map(|(peer, entry)| (peer.clone(), entry.mailbox.clone()))
            .collect()
    }
}

/// One node's handle onto the hub
pub struct LocalEndpoint {
    uri: NodeUri,
    hub: LocalHub,
}

impl LocalEndpoint {
    pub fn uri(&self) -> &NodeUri {
        &self.uri
    }
}

#[async_trait]
impl Broadcaster for LocalEndpoint {
    async fn send_sync(&self, members: &[NodeUri], message: Message) -> Result<(), TransportError> {
        // Resolve every recipient first so an unreachable member delivers nothing
        let mut recipients = Vec::with_capacity(members.len());
        for member in members.iter().filter(|m| **m != self.uri) {
            let mailbox = self
                .hub
                .mailbox(member)
                .ok_or_else(|| TransportError::Unreachable(member.clone()))?;
            recipients.push((member.clone(), mailbox));
        }

        let mut acks = Vec::new();
        for (peer, mailbox) in recipients {
            let (tx, rx) = oneshot::channel();
            let envelope = Envelope::Deliver {
                message: message.clone(),
                ack: Some(tx),
            };
            if mailbox.send(envelope).is_err() {
                return Err(TransportError::Closed(peer));
            }
            acks.push((peer, rx));
        }

        let mut first_error = None;
        for (peer, rx) in acks {
            let outcome = match rx.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => TransportError::Remote(format!("{}: {}", peer, e)),
                Err(_) => TransportError::Closed(peer),
            };
            warn!("send_sync {} from {} failed: {}", message.kind(), self.uri, outcome);
            first_error.get_or_insert(outcome);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_async(&self, message: Message) {
        for (peer, mailbox) in self.hub.peers(&self.uri) {
            let envelope = Envelope::Deliver {
                message: message.clone(),
                ack: None,
            };
            if mailbox.send(envelope).is_err() {
                debug!("send_async {} to {} dropped", message.kind(), peer);
            }
        }
    }

    async fn send_to(&self, destination: &NodeUri, message: Message) -> Result<(), TransportError> {
        let mailbox = self
            .hub
            .mailbox(destination)
            .ok_or_else(|| TransportError::Unreachable(destination.clone()))?;
        mailbox
            .send(Envelope::Deliver { message, ack: None })
            .map_err(|_| TransportError::Closed(destination.clone()))
    }
}

#[async_trait]
impl FragmentClient for LocalEndpoint {
    async fn retrieve_fragment(
        &self,
        owner: &NodeUri,
        key: &FragmentKey,
    ) -> Result<Bytes, TransportError> {
        let store = self
            .hub
            .store(owner)
            .ok_or_else(|| TransportError::Unreachable(owner.clone()))?;
        store
            .export_fragment(key)
            .map_err(|e| TransportError::Remote(format!("{}: {}", owner, e)))
    }
}

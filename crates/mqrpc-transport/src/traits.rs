//! Core transport trait definitions

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::{Delivery, DeliveryMeta, Destination, OutboundMessage, TransportResult};

/// Publish/consume/ack primitives the RPC core runs on
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message to its destination
    async fn publish(&self, message: OutboundMessage) -> TransportResult<()>;

    /// Start consuming a source. Every consumer of the same source competes
    /// for its deliveries; each delivery goes to exactly one of them.
    async fn consume(&self, source: &Destination) -> TransportResult<Consumer>;

    /// Acknowledge a delivery
    async fn ack(&self, meta: &DeliveryMeta) -> TransportResult<()>;

    /// Tear down a source that is no longer consumed (e.g. a client's reply
    /// destination at shutdown)
    async fn release(&self, source: &Destination) -> TransportResult<()>;

    /// Get transport type identifier
    fn transport_type(&self) -> &'static str;
}

/// Receiving end of a consumed source.
///
/// Clones share the same underlying stream, so a pool of workers holding
/// clones behaves as competing consumers.
#[derive(Clone)]
pub struct Consumer {
    source: Destination,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
}

impl Consumer {
    /// Wrap a delivery stream
    pub fn new(source: Destination, receiver: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>) -> Self {
        Self { source, receiver }
    }

    /// Source this consumer reads
    pub fn source(&self) -> &Destination {
        &self.source
    }

    /// Next delivery, or `None` once the source is closed and drained.
    ///
    /// Cancel-safe: dropping the future never loses a delivery.
    pub async fn next(&self) -> Option<Delivery> {
        self.receiver.lock().await.recv().await
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

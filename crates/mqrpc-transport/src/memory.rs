//! In-memory broker
//!
//! Queues are created on first publish or consume. Every published message
//! gets a broker-wide delivery tag and stays outstanding until acknowledged;
//! acknowledging a tag twice is an error, which lets tests assert the
//! exactly-once acknowledgment discipline of the dispatcher.
//!
//! Releasing a queue does not stop later publishes to it: the next publish
//! recreates the queue, and with no consumer the message stays outstanding
//! until the broker is dropped. A reply sent after its client shut down ends
//! up there. This broker only backs tests and demos, so nothing reclaims it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, trace};

use crate::{
    Consumer, Delivery, DeliveryMeta, Destination, OutboundMessage, Transport, TransportError,
    TransportResult,
};

struct Queue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Delivery>>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<Destination, Queue>>,
    outstanding: Mutex<HashMap<u64, Destination>>,
    published: Mutex<HashMap<Destination, u64>>,
    acked: AtomicU64,
    next_tag: AtomicU64,
    closed: AtomicBool,
}

/// In-process broker for testing and local communication
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages ever published to `destination`
    pub fn published_count(&self, destination: &Destination) -> u64 {
        self.state
            .published
            .lock()
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    /// Deliveries acknowledged so far
    pub fn acked_count(&self) -> u64 {
        self.state.acked.load(Ordering::SeqCst)
    }

    /// Published messages not yet acknowledged
    pub fn outstanding_count(&self) -> usize {
        self.state.outstanding.lock().len()
    }

    /// Whether `destination` currently exists
    pub fn has_queue(&self, destination: &Destination) -> bool {
        self.state.queues.lock().contains_key(destination)
    }

    /// Whether [`MemoryBroker::close`] was called
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Shut the broker down; consumers drain what is buffered and then end
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.queues.lock().clear();
        debug!("memory broker closed");
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> TransportResult<()> {
        self.ensure_open()?;
        let tag = self.state.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let destination = message.destination;
        let delivery = Delivery {
            payload: message.payload,
            meta: DeliveryMeta {
                delivery_tag: tag,
                source: destination.clone(),
                correlation_id: message.correlation_id,
                reply_to: message.reply_to,
            },
        };

        // Outstanding before visible, so a fast consumer can ack it.
        self.state.outstanding.lock().insert(tag, destination.clone());
        let sent = {
            let mut queues = self.state.queues.lock();
            let queue = queues.entry(destination.clone()).or_insert_with(Queue::new);
            queue.sender.send(delivery)
        };
        if sent.is_err() {
            self.state.outstanding.lock().remove(&tag);
            return Err(TransportError::PublishFailed {
                destination,
                reason: "queue receiver dropped".to_string(),
            });
        }

        *self
            .state
            .published
            .lock()
            .entry(destination.clone())
            .or_insert(0) += 1;
        trace!(destination = %destination, delivery_tag = tag, "published");
        Ok(())
    }

    async fn consume(&self, source: &Destination) -> TransportResult<Consumer> {
        self.ensure_open()?;
        let mut queues = self.state.queues.lock();
        let queue = queues.entry(source.clone()).or_insert_with(Queue::new);
        Ok(Consumer::new(source.clone(), queue.receiver.clone()))
    }

    async fn ack(&self, meta: &DeliveryMeta) -> TransportResult<()> {
        if self.state.outstanding.lock().remove(&meta.delivery_tag).is_none() {
            return Err(TransportError::UnknownDeliveryTag {
                tag: meta.delivery_tag,
            });
        }
        self.state.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, source: &Destination) -> TransportResult<()> {
        if self.state.queues.lock().remove(source).is_some() {
            debug!(destination = %source, "queue released");
        }
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

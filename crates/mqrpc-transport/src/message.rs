//! Messages crossing the transport

use mqrpc_core::CorrelationId;

use crate::Destination;

/// A message to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Where the message goes
    pub destination: Destination,
    /// Encoded envelope
    pub payload: Vec<u8>,
    /// Token echoed on the reply (synchronous requests and replies only)
    pub correlation_id: Option<CorrelationId>,
    /// Where the receiver should publish its reply
    pub reply_to: Option<Destination>,
}

impl OutboundMessage {
    /// A message with no correlation metadata
    pub fn new(destination: Destination, payload: Vec<u8>) -> Self {
        Self {
            destination,
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Attach a correlation token
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Attach a reply destination
    pub fn with_reply_to(mut self, reply_to: Destination) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// Transport metadata of a received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMeta {
    /// Token used to acknowledge this delivery
    pub delivery_tag: u64,
    /// Source the message was consumed from
    pub source: Destination,
    /// Correlation token set by the publisher
    pub correlation_id: Option<CorrelationId>,
    /// Reply destination set by the publisher
    pub reply_to: Option<Destination>,
}

/// A received message awaiting acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Encoded envelope
    pub payload: Vec<u8>,
    /// Transport metadata
    pub meta: DeliveryMeta,
}

impl Delivery {
    /// Payload as text, for diagnostics
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

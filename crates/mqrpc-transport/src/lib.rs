//! # mqrpc-transport
//!
//! The transport binding the RPC core runs on: publish a message to a named
//! destination, consume deliveries from a named source, acknowledge each
//! delivery manually. Broker topology, durability and connection recovery
//! belong to the concrete transport, not to this crate.
//!
//! [`MemoryBroker`] is an in-process implementation with competing
//! consumers and manual-ack bookkeeping, used by tests and the demo.

pub mod destination;
pub mod error;
pub mod memory;
pub mod message;
pub mod traits;

pub use destination::Destination;
pub use error::{TransportError, TransportResult};
pub use memory::MemoryBroker;
pub use message::{Delivery, DeliveryMeta, OutboundMessage};
pub use traits::{Consumer, Transport};

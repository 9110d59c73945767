//! # mqrpc
//!
//! Remote procedure calls over a queue-based message transport.
//!
//! ## Server side
//!
//! A handler object lists its operations ([`Operation`], [`ExposeOperations`]).
//! [`RpcServer::attach`] registers them for each configured [`CallMode`] in a
//! sealed [`CommandRegistry`] and starts a pool of workers per mode. Every
//! delivery is decoded, dispatched and acknowledged exactly once by a
//! [`Dispatcher`]; synchronous requests are answered on their reply
//! destination with the request's correlation id.
//!
//! ## Client side
//!
//! [`RpcClient`] publishes requests and, for synchronous calls, waits for the
//! correlated reply with a per-attempt timeout and a fixed number of attempts.
//! Replies are routed to waiting callers through the [`PendingCalls`] table.
//!
//! ```ignore
//! let server = RpcServer::attach("orders", transport.clone(), operations, ServerConfig::default()).await?;
//! let client = RpcClient::attach("orders", transport, ClientConfig::default()).await?;
//! let total: Option<i64> = client.call_sync("getTotal", (42,)).await?;
//! ```

pub mod client;
pub mod dispatcher;
pub mod handler;
pub mod metrics;
pub mod pending;
pub mod registry;
pub mod server;

pub use client::{ClientOperation, Returns, RpcClient, ServiceEndpoint};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use handler::{CommandHandler, ExposeOperations, HandlerError, HandlerFuture, Operation};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use pending::{PendingCalls, PendingGuard};
pub use registry::{CommandRegistry, CommandRegistryBuilder, HandlerDescriptor};
pub use server::{request_destination, RpcServer};

pub use mqrpc_core::{
    CallMode, CallOptions, ClientConfig, CorrelationId, FromArgs, IntoArgs, ParamType, RawArgs,
    Result, RpcConfig, RpcError, ServerConfig,
};
pub use mqrpc_transport::{Destination, MemoryBroker, Transport, TransportError};

//! # mqrpc-core
//!
//! Shared building blocks for remote procedure calls carried over a
//! queue-based message transport:
//!
//! - [`CallMode`] and [`CorrelationId`], the two values every request is
//!   tagged with
//! - The envelope codec ([`envelope`]) defining the request and response
//!   wire format
//! - Positional argument marshaling ([`args`]) with deferred, type-directed
//!   decoding on the server side
//! - The error taxonomy ([`RpcError`]) shared by client and server
//! - Configuration ([`RpcConfig`]) for timeouts, retries, worker
//!   concurrency and slow-call detection
//!
//! Transport primitives live in `mqrpc-transport`; the registry, dispatcher
//! and call engine live in `mqrpc`.

pub mod args;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod mode;

pub use args::{ArgumentError, ArgumentErrors, FromArgs, IntoArgs, ParamType, RawArgs};
pub use config::{CallOptions, ClientConfig, RpcConfig, ServerConfig};
pub use correlation::CorrelationId;
pub use envelope::{
    decode_request, decode_response, encode_request, encode_response, RequestEnvelope,
};
pub use error::{Result, RpcError};
pub use mode::CallMode;

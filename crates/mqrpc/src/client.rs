//! RPC client
//!
//! An [`RpcClient`] owns a private reply destination and a background task
//! consuming it. Synchronous calls publish to the service's synchronous
//! request destination with a fresh correlation id per attempt and wait for
//! the matching reply; asynchronous calls publish to the asynchronous
//! request destination and return immediately.
//!
//! Operations can be declared up front with [`ClientOperation`]. A
//! declaration that pairs asynchronous delivery with a non-void return is
//! rejected with [`RpcError::InvalidSignature`] at attach time, and
//! [`RpcClient::call_async`] refuses commands declared that way.

use mqrpc_core::{
    decode_response, encode_request, CallMode, CallOptions, ClientConfig, CorrelationId, IntoArgs,
    Result, RpcError,
};
use mqrpc_transport::{Consumer, Delivery, Destination, OutboundMessage, Transport};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pending::PendingCalls;
use crate::server::request_destination;

/// Destinations a client uses to reach one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Logical service name
    pub service_name: String,
    /// Destination of synchronous requests
    pub sync_destination: Destination,
    /// Destination of asynchronous requests
    pub async_destination: Destination,
    /// Reply destination private to this client
    pub reply_destination: Destination,
}

impl ServiceEndpoint {
    /// Endpoint with a fresh, unique reply destination
    pub fn new(service: &str) -> Self {
        Self {
            service_name: service.to_string(),
            sync_destination: request_destination(service, CallMode::Sync),
            async_destination: request_destination(service, CallMode::Async),
            reply_destination: Destination::replies(service, Uuid::new_v4()),
        }
    }
}

/// Declared result of a client operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Nothing
    Unit,
    /// A value
    Value,
}

/// Declared client-side signature of a remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOperation {
    /// Exposed command name
    pub command: &'static str,
    /// Delivery mode
    pub mode: CallMode,
    /// Declared result
    pub returns: Returns,
}

impl ClientOperation {
    /// Declare an operation
    pub const fn new(command: &'static str, mode: CallMode, returns: Returns) -> Self {
        Self {
            command,
            mode,
            returns,
        }
    }

    /// Synchronous operation with a result
    pub const fn sync(command: &'static str) -> Self {
        Self::new(command, CallMode::Sync, Returns::Value)
    }

    /// Synchronous operation without a result
    pub const fn sync_unit(command: &'static str) -> Self {
        Self::new(command, CallMode::Sync, Returns::Unit)
    }

    /// Fire-and-forget operation
    pub const fn fire_and_forget(command: &'static str) -> Self {
        Self::new(command, CallMode::Async, Returns::Unit)
    }

    fn validate(&self, service: &str) -> Result<()> {
        if self.command.is_empty() {
            return Err(self.invalid(service, "command name must not be empty"));
        }
        if self.mode == CallMode::Async && self.returns != Returns::Unit {
            return Err(self.invalid(
                service,
                "asynchronous operations cannot return a value",
            ));
        }
        Ok(())
    }

    fn invalid(&self, service: &str, reason: &str) -> RpcError {
        RpcError::InvalidSignature {
            service: service.to_string(),
            command: self.command.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct ClientInner {
    endpoint: ServiceEndpoint,
    transport: Arc<dyn Transport>,
    pending: PendingCalls,
    options: CallOptions,
    declared: HashMap<&'static str, ClientOperation>,
    reply_consumer_running: AtomicBool,
    closed: AtomicBool,
}

/// Client of one remote service
pub struct RpcClient {
    inner: Arc<ClientInner>,
    shutdown: watch::Sender<bool>,
    reply_consumer: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Attach a client with no declared operations
    pub async fn attach(
        service: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        Self::attach_declared(service, transport, config, &[]).await
    }

    /// Attach a client, validating its declared operations first.
    ///
    /// Nothing is published or consumed if a declaration is invalid.
    pub async fn attach_declared(
        service: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        operations: &[ClientOperation],
    ) -> Result<Self> {
        let service = service.into();
        config.validate()?;

        let mut declared = HashMap::new();
        for operation in operations {
            operation.validate(&service)?;
            if declared.insert(operation.command, *operation).is_some() {
                return Err(RpcError::DuplicateCommand {
                    service: service.clone(),
                    mode: operation.mode,
                    command: operation.command.to_string(),
                });
            }
        }

        let endpoint = ServiceEndpoint::new(&service);
        let consumer = transport.consume(&endpoint.reply_destination).await?;
        let inner = Arc::new(ClientInner {
            endpoint,
            transport,
            pending: PendingCalls::new(),
            options: config.call_options(),
            declared,
            reply_consumer_running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let reply_consumer = tokio::spawn(run_reply_consumer(inner.clone(), consumer, shutdown_rx));
        info!(
            service = %inner.endpoint.service_name,
            reply_to = %inner.endpoint.reply_destination,
            transport = inner.transport.transport_type(),
            "Client attached"
        );

        Ok(Self {
            inner,
            shutdown,
            reply_consumer: Mutex::new(Some(reply_consumer)),
        })
    }

    /// Destinations this client uses
    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.inner.endpoint
    }

    /// Synchronous calls awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Call `command` and wait for its result with the client's default
    /// timeout and attempt count.
    ///
    /// `Ok(None)` means the remote operation returned nothing, returned
    /// null, or failed.
    pub async fn call_sync<R: DeserializeOwned>(
        &self,
        command: &str,
        args: impl IntoArgs,
    ) -> Result<Option<R>> {
        self.call_sync_with(command, args, self.inner.options).await
    }

    /// [`RpcClient::call_sync`] with explicit timeout and attempt count
    pub async fn call_sync_with<R: DeserializeOwned>(
        &self,
        command: &str,
        args: impl IntoArgs,
        options: CallOptions,
    ) -> Result<Option<R>> {
        options.validate()?;
        let args = args.into_args()?;
        let payload = encode_request(command, &args)?;
        let result = self.inner.request(command, payload, options).await?;
        Ok(result.map(serde_json::from_value).transpose()?)
    }

    /// Fire `command` without waiting.
    ///
    /// Only a command declared with a non-void return fails, with
    /// [`RpcError::InvalidSignature`] and before anything is published.
    /// Every other failure is logged and swallowed.
    pub async fn call_async(&self, command: &str, args: impl IntoArgs) -> Result<()> {
        if let Some(operation) = self.inner.declared.get(command) {
            if operation.returns != Returns::Unit {
                return Err(operation.invalid(
                    &self.inner.endpoint.service_name,
                    "declared with a return value but called asynchronously",
                ));
            }
        }
        if let Err(e) = self.inner.send_async(command, args).await {
            error!(
                service = %self.inner.endpoint.service_name,
                command = %command,
                error = %e,
                "Asynchronous call not delivered"
            );
        }
        Ok(())
    }

    /// Call a declared synchronous operation
    pub async fn invoke_sync<R: DeserializeOwned>(
        &self,
        operation: &ClientOperation,
        args: impl IntoArgs,
    ) -> Result<Option<R>> {
        let service = &self.inner.endpoint.service_name;
        operation.validate(service)?;
        if operation.mode != CallMode::Sync {
            return Err(operation.invalid(service, "declared asynchronous but called synchronously"));
        }
        self.call_sync(operation.command, args).await
    }

    /// Fire a declared asynchronous operation
    pub async fn invoke_async(&self, operation: &ClientOperation, args: impl IntoArgs) -> Result<()> {
        let service = &self.inner.endpoint.service_name;
        operation.validate(service)?;
        if operation.returns != Returns::Unit {
            return Err(operation.invalid(
                service,
                "declared with a return value but called asynchronously",
            ));
        }
        self.call_async(operation.command, args).await
    }

    /// Stop the reply consumer and release the reply destination.
    ///
    /// Calls still waiting fail with [`RpcError::Unavailable`], as does
    /// every later synchronous call. Shutting down twice is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let reply_consumer = self.reply_consumer.lock().take();
        if let Some(reply_consumer) = reply_consumer {
            if let Err(e) = reply_consumer.await {
                warn!(service = %self.inner.service(), error = %e, "Reply consumer ended abnormally");
            }
        }
        let abandoned = self.inner.pending.clear();
        if let Err(e) = self
            .inner
            .transport
            .release(&self.inner.endpoint.reply_destination)
            .await
        {
            warn!(service = %self.inner.service(), error = %e, "Reply destination not released");
        }
        info!(service = %self.inner.service(), abandoned, "Client stopped");
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.inner.endpoint)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn service(&self) -> &str {
        &self.endpoint.service_name
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::unavailable(self.service(), "client endpoint is shut down"));
        }
        if !self.reply_consumer_running.load(Ordering::SeqCst) {
            warn!(
                service = %self.service(),
                reply_to = %self.endpoint.reply_destination,
                "Reply consumer is not running; replies cannot be received"
            );
        }
        Ok(())
    }

    async fn request(
        &self,
        command: &str,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Option<Value>> {
        self.ensure_open()?;
        let started = Instant::now();

        for attempt in 1..=options.max_attempts {
            let correlation_id = CorrelationId::new();
            let receiver = self.pending.register(correlation_id, command);
            let _entry = self.pending.guard(correlation_id);
            let message = OutboundMessage::new(self.endpoint.sync_destination.clone(), payload.clone())
                .with_correlation_id(correlation_id)
                .with_reply_to(self.endpoint.reply_destination.clone());

            if let Err(e) = self.transport.publish(message).await {
                error!(
                    service = %self.service(),
                    command = %command,
                    attempt,
                    error = %e,
                    "Request publish failed"
                );
                return Err(RpcError::unavailable(self.service(), e.to_string()));
            }

            match tokio::time::timeout(options.timeout, receiver).await {
                Ok(Ok(result)) => {
                    info!(
                        service = %self.service(),
                        command = %command,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Call completed"
                    );
                    return Ok(result);
                }
                Ok(Err(_)) => {
                    return Err(RpcError::unavailable(
                        self.service(),
                        "client endpoint shut down while waiting for a reply",
                    ));
                }
                Err(_) => {
                    warn!(
                        service = %self.service(),
                        command = %command,
                        correlation_id = %correlation_id,
                        attempt,
                        max_attempts = options.max_attempts,
                        timeout_ms = options.timeout.as_millis() as u64,
                        "No reply within window"
                    );
                }
            }
        }

        error!(
            service = %self.service(),
            command = %command,
            attempts = options.max_attempts,
            "Service unavailable"
        );
        Err(RpcError::Timeout {
            service: self.service().to_string(),
            command: command.to_string(),
            attempts: options.max_attempts,
            timeout_ms: options.timeout.as_millis() as u64,
        })
    }

    async fn send_async(&self, command: &str, args: impl IntoArgs) -> Result<()> {
        self.ensure_open()?;
        let payload = encode_request(command, &args.into_args()?)?;
        self.transport
            .publish(OutboundMessage::new(self.endpoint.async_destination.clone(), payload))
            .await?;
        debug!(service = %self.service(), command = %command, "Asynchronous call sent");
        Ok(())
    }

    async fn route_reply(&self, delivery: Delivery) {
        match delivery.meta.correlation_id {
            None => warn!(
                service = %self.service(),
                payload = %delivery.payload_lossy(),
                "Reply without correlation id discarded"
            ),
            Some(correlation_id) => match decode_response(&delivery.payload) {
                Ok(result) => {
                    if !self.pending.resolve(&correlation_id, result) {
                        debug!(
                            service = %self.service(),
                            correlation_id = %correlation_id,
                            "Discarding reply with no waiting caller"
                        );
                    }
                }
                Err(e) => error!(
                    service = %self.service(),
                    correlation_id = %correlation_id,
                    error = %e,
                    "Undecodable reply discarded"
                ),
            },
        }

        if let Err(e) = self.transport.ack(&delivery.meta).await {
            error!(
                service = %self.service(),
                delivery_tag = delivery.meta.delivery_tag,
                error = %e,
                "Reply acknowledgment failed"
            );
        }
    }
}

async fn run_reply_consumer(
    inner: Arc<ClientInner>,
    consumer: Consumer,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let delivery = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = consumer.next() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };
        inner.route_reply(delivery).await;
    }
    inner.reply_consumer_running.store(false, Ordering::SeqCst);
    debug!(service = %inner.service(), "Reply consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mqrpc_transport::MemoryBroker;

    #[test]
    fn endpoints_are_unique_per_client() {
        let a = ServiceEndpoint::new("orders");
        let b = ServiceEndpoint::new("orders");
        assert_eq!(a.sync_destination.as_str(), "orders");
        assert_eq!(a.async_destination.as_str(), "orders.async");
        assert!(a.reply_destination.as_str().starts_with("orders.reply."));
        assert_ne!(a.reply_destination, b.reply_destination);
    }

    #[test]
    fn async_operations_must_be_void() {
        assert!(ClientOperation::fire_and_forget("logAccess").validate("orders").is_ok());
        assert!(ClientOperation::sync("getTotal").validate("orders").is_ok());
        assert_matches!(
            ClientOperation::new("getTotal", CallMode::Async, Returns::Value).validate("orders"),
            Err(RpcError::InvalidSignature { .. })
        );
    }

    #[tokio::test]
    async fn invalid_declarations_fail_before_consuming() {
        let broker = MemoryBroker::new();
        let result = RpcClient::attach_declared(
            "orders",
            Arc::new(broker.clone()),
            ClientConfig::default(),
            &[ClientOperation::new("getTotal", CallMode::Async, Returns::Value)],
        )
        .await;
        assert_matches!(result, Err(RpcError::InvalidSignature { .. }));
    }

    #[tokio::test]
    async fn duplicate_declarations_are_rejected() {
        let broker = MemoryBroker::new();
        let result = RpcClient::attach_declared(
            "orders",
            Arc::new(broker),
            ClientConfig::default(),
            &[ClientOperation::sync("getTotal"), ClientOperation::sync_unit("getTotal")],
        )
        .await;
        assert_matches!(result, Err(RpcError::DuplicateCommand { .. }));
    }

    #[tokio::test]
    async fn shutdown_releases_reply_destination() {
        let broker = MemoryBroker::new();
        let client = RpcClient::attach("orders", Arc::new(broker.clone()), ClientConfig::default())
            .await
            .unwrap();
        let reply_to = client.endpoint().reply_destination.clone();
        assert!(broker.has_queue(&reply_to));
        client.shutdown().await;
        assert!(!broker.has_queue(&reply_to));

        assert_matches!(
            client.call_sync::<i64>("getTotal", (42,)).await,
            Err(RpcError::Unavailable { .. })
        );
        client.shutdown().await;
    }
}

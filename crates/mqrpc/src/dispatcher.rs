//! Server-side request dispatch
//!
//! One [`Dispatcher`] serves one `(service, mode)` request destination. Each
//! delivery moves through
//!
//! ```text
//! RECEIVED -> PARSED -> DISPATCHED -> ACKNOWLEDGED
//!          \-> REJECTED ------------/
//! ```
//!
//! and is acknowledged exactly once whatever happens in between: a malformed
//! envelope, an unknown command, an argument that does not decode, a failing
//! or panicking handler and an unpublishable reply all end in the same single
//! acknowledgment. Only synchronous requests get a response; it carries the
//! request's correlation id and goes to its reply destination.

use futures::FutureExt;
use mqrpc_core::{decode_request, encode_response, CallMode, RpcError};
use mqrpc_transport::{Delivery, DeliveryMeta, OutboundMessage, Transport};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::handler::panic_message;
use crate::metrics::DispatchMetrics;
use crate::registry::CommandRegistry;

/// Terminal state of one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The envelope could not be parsed
    Rejected,
    /// No handler is registered for the command
    NotFound,
    /// The handler ran; nothing was sent back (asynchronous mode)
    Completed,
    /// The handler failed or panicked; nothing was sent back (asynchronous mode)
    HandlerFailed,
    /// A response was published (synchronous mode). `has_data` is false for
    /// void, null and failed invocations.
    Replied {
        /// Whether the response carried a result
        has_data: bool,
    },
    /// A response was due but could not be published
    ReplyFailed,
    /// Processing panicked outside the handler
    Aborted,
}

/// Request dispatcher for one `(service, mode)` destination
pub struct Dispatcher {
    service: String,
    mode: CallMode,
    registry: Arc<CommandRegistry>,
    transport: Arc<dyn Transport>,
    slow_call_threshold: Duration,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher over a sealed registry
    pub fn new(
        service: impl Into<String>,
        mode: CallMode,
        registry: Arc<CommandRegistry>,
        transport: Arc<dyn Transport>,
        slow_call_threshold: Duration,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            service: service.into(),
            mode,
            registry,
            transport,
            slow_call_threshold,
            metrics,
        }
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Call mode served
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// Process one delivery to completion and acknowledge it.
    ///
    /// A panic anywhere in processing is caught here, so the single
    /// acknowledgment below is reached on every path and the calling worker
    /// keeps running.
    pub async fn handle(&self, delivery: Delivery) -> DispatchOutcome {
        self.metrics.record_received();
        let outcome = match AssertUnwindSafe(self.process(&delivery))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                self.metrics.record_aborted();
                error!(
                    service = %self.service,
                    mode = %self.mode,
                    panic = %panic_message(panic.as_ref()),
                    payload = %delivery.payload_lossy(),
                    "Dispatch panicked"
                );
                DispatchOutcome::Aborted
            }
        };
        self.acknowledge(&delivery.meta).await;
        outcome
    }

    async fn process(&self, delivery: &Delivery) -> DispatchOutcome {
        let request = match decode_request(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                self.metrics.record_rejected();
                error!(
                    service = %self.service,
                    mode = %self.mode,
                    error = %e,
                    payload = %delivery.payload_lossy(),
                    "Rejected malformed request"
                );
                return DispatchOutcome::Rejected;
            }
        };

        let descriptor = match self
            .registry
            .lookup(&self.service, self.mode, &request.command)
        {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.metrics.record_not_found();
                error!(
                    service = %self.service,
                    mode = %self.mode,
                    command = %request.command,
                    error = %e,
                    payload = %delivery.payload_lossy(),
                    "No handler registered"
                );
                return DispatchOutcome::NotFound;
            }
        };

        let started = Instant::now();
        let result = descriptor.invoke(&request.args).await;
        self.log_duration(&request.command, started.elapsed(), delivery);

        let data = match result {
            Ok(data) => {
                self.metrics.record_completed();
                Some(data)
            }
            Err(e) => {
                self.metrics.record_handler_failure();
                let error = RpcError::handler(&request.command, e.to_string());
                error!(
                    service = %self.service,
                    mode = %self.mode,
                    command = %request.command,
                    error = %error,
                    payload = %delivery.payload_lossy(),
                    "Handler failed"
                );
                None
            }
        };

        if self.mode.expects_reply() {
            return self
                .reply(delivery, &request.command, data.flatten())
                .await;
        }
        match data {
            Some(_) => DispatchOutcome::Completed,
            None => DispatchOutcome::HandlerFailed,
        }
    }

    async fn reply(
        &self,
        delivery: &Delivery,
        command: &str,
        data: Option<Value>,
    ) -> DispatchOutcome {
        let Some(reply_to) = delivery.meta.reply_to.clone() else {
            self.metrics.record_reply_failure();
            error!(
                service = %self.service,
                command = %command,
                "Synchronous request carries no reply destination"
            );
            return DispatchOutcome::ReplyFailed;
        };

        let payload = match encode_response(data.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_reply_failure();
                error!(service = %self.service, command = %command, error = %e, "Response encoding failed");
                return DispatchOutcome::ReplyFailed;
            }
        };

        let mut message = OutboundMessage::new(reply_to.clone(), payload);
        if let Some(correlation_id) = delivery.meta.correlation_id {
            message = message.with_correlation_id(correlation_id);
        }

        match self.transport.publish(message).await {
            Ok(()) => {
                self.metrics.record_reply_published();
                debug!(
                    service = %self.service,
                    command = %command,
                    reply_to = %reply_to,
                    has_data = data.is_some(),
                    "Response published"
                );
                DispatchOutcome::Replied {
                    has_data: data.is_some(),
                }
            }
            Err(e) => {
                self.metrics.record_reply_failure();
                error!(
                    service = %self.service,
                    command = %command,
                    reply_to = %reply_to,
                    error = %e,
                    "Response publish failed"
                );
                DispatchOutcome::ReplyFailed
            }
        }
    }

    fn log_duration(&self, command: &str, elapsed: Duration, delivery: &Delivery) {
        let elapsed_ms = elapsed.as_millis() as u64;
        info!(
            service = %self.service,
            mode = %self.mode,
            command = %command,
            elapsed_ms,
            "Request handled"
        );
        if elapsed > self.slow_call_threshold {
            self.metrics.record_slow_call();
            warn!(
                service = %self.service,
                mode = %self.mode,
                command = %command,
                elapsed_ms,
                threshold_ms = self.slow_call_threshold.as_millis() as u64,
                payload = %delivery.payload_lossy(),
                "Slow call"
            );
        }
    }

    async fn acknowledge(&self, meta: &DeliveryMeta) {
        match self.transport.ack(meta).await {
            Ok(()) => self.metrics.record_acked(),
            Err(e) => {
                self.metrics.record_ack_failure();
                error!(
                    service = %self.service,
                    mode = %self.mode,
                    delivery_tag = meta.delivery_tag,
                    error = %e,
                    "Acknowledgment failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("service", &self.service)
            .field("mode", &self.mode)
            .field("slow_call_threshold", &self.slow_call_threshold)
            .finish_non_exhaustive()
    }
}

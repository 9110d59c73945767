//! RPC server
//!
//! [`RpcServer::attach`] registers a handler object's operations for every
//! configured call mode, seals the registry, and starts a pool of
//! `concurrency` workers per mode. Workers of the same mode compete for
//! deliveries on the mode's request destination.

use mqrpc_core::{CallMode, Result, ServerConfig};
use mqrpc_transport::{Consumer, Destination, Transport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::handler::{ExposeOperations, Operation};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::registry::{CommandRegistry, CommandRegistryBuilder};

/// Request destination of a service for a call mode
pub fn request_destination(service: &str, mode: CallMode) -> Destination {
    match mode {
        CallMode::Sync => Destination::sync_requests(service),
        CallMode::Async => Destination::async_requests(service),
    }
}

/// A running server for one service
pub struct RpcServer {
    service: String,
    registry: Arc<CommandRegistry>,
    metrics: Arc<DispatchMetrics>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl RpcServer {
    /// Register `operations` under `service` and start consuming.
    ///
    /// Registration errors ([`mqrpc_core::RpcError::DuplicateCommand`]) and
    /// invalid configuration are reported before any consumer starts.
    pub async fn attach(
        service: impl Into<String>,
        transport: Arc<dyn Transport>,
        operations: Vec<Operation>,
        config: ServerConfig,
    ) -> Result<Self> {
        let service = service.into();
        config.validate()?;

        let mut builder = CommandRegistryBuilder::new();
        for mode in &config.modes {
            for operation in &operations {
                builder.register_operation(&service, *mode, operation)?;
            }
        }
        let registry = Arc::new(builder.seal());
        if registry.is_empty() {
            warn!(service = %service, "Server attached with no operations");
        }

        let metrics = Arc::new(DispatchMetrics::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::new();

        for mode in &config.modes {
            let source = request_destination(&service, *mode);
            let consumer = transport.consume(&source).await?;
            let dispatcher = Arc::new(Dispatcher::new(
                service.clone(),
                *mode,
                registry.clone(),
                transport.clone(),
                config.slow_call_threshold(),
                metrics.clone(),
            ));
            for worker in 0..config.concurrency {
                workers.push(tokio::spawn(run_worker(
                    dispatcher.clone(),
                    consumer.clone(),
                    shutdown_rx.clone(),
                    worker,
                )));
            }
            info!(
                service = %service,
                mode = %mode,
                source = %source,
                transport = transport.transport_type(),
                commands = ?registry.commands(&service, *mode),
                workers = config.concurrency,
                "Dispatcher started"
            );
        }

        Ok(Self {
            service,
            registry,
            metrics,
            shutdown,
            workers,
        })
    }

    /// Attach a handler object
    pub async fn expose<T: ExposeOperations>(
        service: impl Into<String>,
        transport: Arc<dyn Transport>,
        handler: Arc<T>,
        config: ServerConfig,
    ) -> Result<Self> {
        Self::attach(service, transport, handler.exposed_operations(), config).await
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sealed registry this server dispatches from
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Current dispatch counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of running workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking new deliveries and wait for in-flight ones to finish
    pub async fn shutdown(self) {
        let Self {
            service,
            shutdown,
            workers,
            ..
        } = self;
        let _ = shutdown.send(true);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(service = %service, error = %e, "Worker ended abnormally");
            }
        }
        info!(service = %service, "Server stopped");
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("service", &self.service)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    dispatcher: Arc<Dispatcher>,
    consumer: Consumer,
    mut shutdown: watch::Receiver<bool>,
    worker: usize,
) {
    debug!(service = %dispatcher.service(), mode = %dispatcher.mode(), worker, "Worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        // A delivery once taken is always processed to its acknowledgment.
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
        dispatcher.handle(delivery).await;
    }
    debug!(service = %dispatcher.service(), mode = %dispatcher.mode(), worker, "Worker stopped");
}

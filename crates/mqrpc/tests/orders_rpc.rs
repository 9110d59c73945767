//! End-to-end calls between a client and a server over the in-memory broker
//!
//! The `orders` service exposes `getTotal(orderId) -> i64`, which fails for
//! negative ids, and `logAccess(orderId)`, which records the id it was
//! called with.

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use futures::future::join_all;
use mqrpc::{
    CallMode, CallOptions, ClientConfig, ClientOperation, Destination, ExposeOperations,
    MemoryBroker, Operation, RpcClient, RpcError, RpcServer, ServerConfig, Transport,
};
use mqrpc_transport::OutboundMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SERVICE: &str = "orders";
const GET_TOTAL: ClientOperation = ClientOperation::sync("getTotal");
const LOG_ACCESS: ClientOperation = ClientOperation::fire_and_forget("logAccess");

#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error("unknown order {0}")]
    Unknown(i64),
    #[error("access log closed")]
    LogClosed,
}

struct OrdersService {
    accessed: mpsc::UnboundedSender<i64>,
    first_call_slow: AtomicBool,
}

impl OrdersService {
    fn new(accessed: mpsc::UnboundedSender<i64>) -> Self {
        Self {
            accessed,
            first_call_slow: AtomicBool::new(false),
        }
    }

    async fn get_total(&self, order_id: i64) -> Result<i64, OrderError> {
        if self.first_call_slow.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if order_id < 0 {
            return Err(OrderError::Unknown(order_id));
        }
        Ok(100)
    }

    fn log_access(&self, order_id: i64) -> Result<(), OrderError> {
        self.accessed.send(order_id).map_err(|_| OrderError::LogClosed)
    }
}

impl ExposeOperations for OrdersService {
    fn exposed_operations(self: Arc<Self>) -> Vec<Operation> {
        let totals = self.clone();
        let log = self;
        vec![
            Operation::new("getTotal", move |(order_id,): (i64,)| {
                let totals = totals.clone();
                async move { totals.get_total(order_id).await }
            }),
            Operation::new("logAccess", move |(order_id,): (i64,)| {
                let result = log.log_access(order_id);
                async move { result }
            }),
        ]
    }
}

struct Harness {
    broker: MemoryBroker,
    server: RpcServer,
    client: Arc<RpcClient>,
    accessed: mpsc::UnboundedReceiver<i64>,
}

async fn harness(server_config: ServerConfig, service: Option<OrdersService>) -> Harness {
    let broker = MemoryBroker::new();
    let transport: Arc<dyn Transport> = Arc::new(broker.clone());
    let (tx, accessed) = mpsc::unbounded_channel();
    let service = Arc::new(service.unwrap_or_else(|| OrdersService::new(tx)));
    let server = RpcServer::expose(SERVICE, transport.clone(), service, server_config)
        .await
        .unwrap();
    let client = RpcClient::attach_declared(
        SERVICE,
        transport,
        ClientConfig::default(),
        &[GET_TOTAL, LOG_ACCESS],
    )
    .await
    .unwrap();
    Harness {
        broker,
        server,
        client: Arc::new(client),
        accessed,
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn quick(attempts: u32) -> CallOptions {
    CallOptions::default()
        .with_timeout(Duration::from_millis(100))
        .with_max_attempts(attempts)
}

#[tokio::test]
async fn sync_call_returns_handler_result() {
    let h = harness(ServerConfig::default(), None).await;

    let total: Option<i64> = h.client.call_sync("getTotal", (42,)).await.unwrap();
    assert_eq!(total, Some(100));

    let total: Option<i64> = h.client.invoke_sync(&GET_TOTAL, (7,)).await.unwrap();
    assert_eq!(total, Some(100));
    assert_eq!(h.client.in_flight(), 0);
}

#[tokio::test]
async fn string_argument_falls_back_to_parsed_text() {
    let h = harness(ServerConfig::default(), None).await;
    let total: Option<i64> = h.client.call_sync("getTotal", ("42",)).await.unwrap();
    assert_eq!(total, Some(100));
}

#[tokio::test]
async fn handler_failure_reads_as_no_result_without_retry() {
    let h = harness(ServerConfig::default(), None).await;

    let total: Option<i64> = h.client.call_sync("getTotal", (-1,)).await.unwrap();
    assert_eq!(total, None);
    assert_eq!(
        h.broker.published_count(&Destination::sync_requests(SERVICE)),
        1
    );
    assert_eq!(h.server.metrics().handler_failures, 1);
}

#[tokio::test]
async fn async_call_eventually_invokes_handler() {
    let mut h = harness(ServerConfig::default(), None).await;

    h.client.call_async("logAccess", (42,)).await.unwrap();
    let logged = tokio::time::timeout(Duration::from_secs(2), h.accessed.recv())
        .await
        .unwrap();
    assert_eq!(logged, Some(42));

    h.client.invoke_async(&LOG_ACCESS, (43,)).await.unwrap();
    let logged = tokio::time::timeout(Duration::from_secs(2), h.accessed.recv())
        .await
        .unwrap();
    assert_eq!(logged, Some(43));

    let reply_to = h.client.endpoint().reply_destination.clone();
    assert_eq!(h.broker.published_count(&reply_to), 0);
}

#[tokio::test]
async fn async_call_of_valued_operation_is_rejected_before_publish() {
    let h = harness(ServerConfig::default(), None).await;

    assert_matches!(
        h.client.call_async("getTotal", (42,)).await,
        Err(RpcError::InvalidSignature { ref command, .. }) if command == "getTotal"
    );
    assert_matches!(
        h.client.invoke_async(&GET_TOTAL, (42,)).await,
        Err(RpcError::InvalidSignature { .. })
    );
    assert_eq!(
        h.broker.published_count(&Destination::async_requests(SERVICE)),
        0
    );
}

#[tokio::test]
async fn unanswered_calls_time_out_after_every_attempt() {
    let broker = MemoryBroker::new();
    let client = RpcClient::attach(SERVICE, Arc::new(broker.clone()), ClientConfig::default())
        .await
        .unwrap();

    let err = client
        .call_sync_with::<i64>("getTotal", (42,), quick(3))
        .await
        .unwrap_err();
    assert_matches!(err, RpcError::Timeout { attempts: 3, timeout_ms: 100, .. });
    assert_eq!(broker.published_count(&Destination::sync_requests(SERVICE)), 3);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn abandoned_calls_leave_no_pending_entries() {
    let broker = MemoryBroker::new();
    let client = RpcClient::attach(SERVICE, Arc::new(broker.clone()), ClientConfig::default())
        .await
        .unwrap();
    let patient = CallOptions::default().with_timeout(Duration::from_secs(10));

    for order_id in 0..5i64 {
        let call = client.call_sync_with::<i64>("getTotal", (order_id,), patient);
        assert!(tokio::time::timeout(Duration::from_millis(20), call)
            .await
            .is_err());
    }
    assert_eq!(broker.published_count(&Destination::sync_requests(SERVICE)), 5);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn late_reply_is_discarded_and_retry_succeeds() {
    let (tx, _accessed) = mpsc::unbounded_channel();
    let service = OrdersService::new(tx);
    service.first_call_slow.store(true, Ordering::SeqCst);
    let config = ServerConfig {
        concurrency: 2,
        ..ServerConfig::default()
    };
    let h = harness(config, Some(service)).await;

    let total: Option<i64> = h
        .client
        .call_sync_with("getTotal", (42,), quick(2))
        .await
        .unwrap();
    assert_eq!(total, Some(100));
    assert_eq!(
        h.broker.published_count(&Destination::sync_requests(SERVICE)),
        2
    );

    // The first attempt's reply still arrives and is dropped.
    let server = &h.server;
    eventually(|| server.metrics().replies_published == 2).await;
    let broker = &h.broker;
    eventually(|| broker.outstanding_count() == 0).await;
    assert_eq!(h.client.in_flight(), 0);
}

#[tokio::test]
async fn unregistered_command_is_acked_without_reply() {
    let h = harness(ServerConfig::default(), None).await;

    let err = h
        .client
        .call_sync_with::<i64>("getTotals", (42,), quick(1))
        .await
        .unwrap_err();
    assert_matches!(err, RpcError::Timeout { attempts: 1, .. });

    let server = &h.server;
    eventually(|| server.metrics().not_found == 1).await;
    let metrics = h.server.metrics();
    assert_eq!(metrics.acked, 1);
    assert_eq!(metrics.replies_published, 0);
    let reply_to = h.client.endpoint().reply_destination.clone();
    assert_eq!(h.broker.published_count(&reply_to), 0);
}

#[tokio::test]
async fn malformed_request_is_acked_and_dropped() {
    let h = harness(ServerConfig::default(), None).await;

    h.broker
        .publish(OutboundMessage::new(
            Destination::async_requests(SERVICE),
            br#"{"data":{"0":42}}"#.to_vec(),
        ))
        .await
        .unwrap();

    let server = &h.server;
    eventually(|| server.metrics().rejected == 1).await;
    let broker = &h.broker;
    eventually(|| broker.outstanding_count() == 0).await;
    assert_eq!(h.server.metrics().acked, 1);
}

#[tokio::test]
async fn duplicate_registration_fails_before_consuming() {
    let broker = MemoryBroker::new();
    let operation = || Operation::new("getTotal", |(id,): (i64,)| async move { Ok::<_, String>(id) });

    let err = RpcServer::attach(
        SERVICE,
        Arc::new(broker.clone()),
        vec![operation(), operation()],
        ServerConfig::default(),
    )
    .await
    .unwrap_err();
    assert_matches!(err, RpcError::DuplicateCommand { mode: CallMode::Sync, .. });
    assert!(!broker.has_queue(&Destination::sync_requests(SERVICE)));
}

#[tokio::test]
async fn exposed_name_may_differ_from_method_name() {
    let broker = MemoryBroker::new();
    let transport: Arc<dyn Transport> = Arc::new(broker);
    let operations = vec![Operation::new("total", |(id,): (i64,)| async move {
        Ok::<_, String>(id * 2)
    })];
    let config = ServerConfig {
        modes: vec![CallMode::Sync],
        ..ServerConfig::default()
    };
    let server = RpcServer::attach(SERVICE, transport.clone(), operations, config)
        .await
        .unwrap();
    assert_eq!(server.registry().commands(SERVICE, CallMode::Sync), vec!["total"]);
    assert!(server.registry().commands(SERVICE, CallMode::Async).is_empty());

    let client = RpcClient::attach(SERVICE, transport, ClientConfig::default())
        .await
        .unwrap();
    let doubled: Option<i64> = client.call_sync("total", (21,)).await.unwrap();
    assert_eq!(doubled, Some(42));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_are_each_answered() {
    let config = ServerConfig {
        concurrency: 4,
        ..ServerConfig::default()
    };
    let h = harness(config, None).await;
    assert_eq!(h.server.worker_count(), 8);

    let calls = (0..20i64).map(|i| {
        let client = h.client.clone();
        async move { client.call_sync::<i64>("getTotal", (i,)).await }
    });
    for result in join_all(calls).await {
        assert_eq!(result.unwrap(), Some(100));
    }
    let server = &h.server;
    eventually(|| server.metrics().replies_published == 20).await;
    assert_eq!(h.client.in_flight(), 0);
}

#[tokio::test]
async fn client_shutdown_fails_waiting_calls() {
    let broker = MemoryBroker::new();
    let client = Arc::new(
        RpcClient::attach(SERVICE, Arc::new(broker.clone()), ClientConfig::default())
            .await
            .unwrap(),
    );

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call_sync_with::<i64>(
                    "getTotal",
                    (42,),
                    CallOptions::default().with_timeout(Duration::from_secs(10)),
                )
                .await
        })
    };
    let pending = client.clone();
    eventually(|| pending.in_flight() == 1).await;

    client.shutdown().await;
    assert_matches!(waiting.await.unwrap(), Err(RpcError::Unavailable { .. }));
    assert_matches!(
        client.call_sync::<i64>("getTotal", (1,)).await,
        Err(RpcError::Unavailable { .. })
    );
}

#[tokio::test]
async fn closed_transport_makes_service_unavailable() {
    let h = harness(ServerConfig::default(), None).await;
    h.broker.close();

    assert_matches!(
        h.client.call_sync::<i64>("getTotal", (42,)).await,
        Err(RpcError::Unavailable { .. })
    );
    // Asynchronous failures are logged, never returned.
    h.client.call_async("logAccess", (42,)).await.unwrap();
    h.server.shutdown().await;
}

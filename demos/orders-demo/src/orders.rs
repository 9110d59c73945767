//! The `orders` service and its typed client

use mqrpc::{ClientOperation, ExposeOperations, Operation, Result, RpcClient};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const SERVICE: &str = "orders";

const GET_TOTAL: ClientOperation = ClientOperation::sync("getTotal");
const LOG_ACCESS: ClientOperation = ClientOperation::fire_and_forget("logAccess");

/// Every operation the client side declares
pub const DECLARED: [ClientOperation; 2] = [GET_TOTAL, LOG_ACCESS];

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("unknown order {0}")]
    Unknown(i64),
}

/// Server-side implementation
#[derive(Debug, Default)]
pub struct OrdersService {
    accesses: AtomicU64,
    latency: Duration,
}

impl OrdersService {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::SeqCst)
    }

    async fn get_total(&self, order_id: i64) -> std::result::Result<i64, OrderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if order_id < 0 {
            return Err(OrderError::Unknown(order_id));
        }
        Ok(100)
    }

    fn log_access(&self, order_id: i64) {
        let total = self.accesses.fetch_add(1, Ordering::SeqCst) + 1;
        info!(order_id, total, "order accessed");
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
                log.log_access(order_id);
                async move { Ok::<_, OrderError>(()) }
            }),
        ]
    }
}

/// Typed client-side view of the service
pub struct OrdersClient {
    client: RpcClient,
}

impl OrdersClient {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    pub async fn get_total(&self, order_id: i64) -> Result<Option<i64>> {
        self.client.invoke_sync(&GET_TOTAL, (order_id,)).await
    }

    pub async fn log_access(&self, order_id: i64) -> Result<()> {
        self.client.invoke_async(&LOG_ACCESS, (order_id,)).await
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.client
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

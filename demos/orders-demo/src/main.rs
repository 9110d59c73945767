// Runs the orders service and a client against an in-memory broker

use anyhow::Context;
use clap::{Parser, Subcommand};
use mqrpc::{MemoryBroker, RpcClient, RpcConfig, RpcError, RpcServer, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod orders;

use orders::{OrdersClient, OrdersService, DECLARED, SERVICE};

/// How long `log` waits for the fire-and-forget call to be handled
const LOG_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "orders-demo")]
#[command(about = "RPC over an in-memory message broker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an order total
    Total {
        /// Order id; negative ids make the handler fail
        #[arg(allow_negative_numbers = true)]
        order_id: i64,
    },

    /// Record an order access without waiting
    Log {
        /// Order id
        order_id: i64,
    },

    /// Call an operation that has no handler and let the call time out
    Missing {
        /// Reply window per attempt in milliseconds
        #[arg(long, default_value = "200")]
        timeout_ms: u64,
    },

    /// Make a handler slower than the reply window
    Slow {
        /// Handler latency in milliseconds
        #[arg(long, default_value = "2500")]
        latency_ms: u64,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RpcConfig> {
    let mut config = match path {
        Some(path) => RpcConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RpcConfig::default(),
    };
    config.merge_with_env()?;
    config.validate()?;
    Ok(config)
}

struct Deployment {
    service: Arc<OrdersService>,
    server: RpcServer,
    client: OrdersClient,
}

async fn deploy(config: &RpcConfig, service: OrdersService) -> anyhow::Result<Deployment> {
    let transport: Arc<dyn Transport> = Arc::new(MemoryBroker::new());
    let service = Arc::new(service);
    let server = RpcServer::expose(
        SERVICE,
        transport.clone(),
        service.clone(),
        config.server.clone(),
    )
    .await?;
    let client =
        RpcClient::attach_declared(SERVICE, transport, config.client.clone(), &DECLARED).await?;
    Ok(Deployment {
        service,
        server,
        client: OrdersClient::new(client),
    })
}

impl Deployment {
    async fn shutdown(self) {
        self.client.shutdown().await;
        let metrics = self.server.metrics();
        self.server.shutdown().await;
        info!(?metrics, "dispatch counters");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Total { order_id } => {
            let deployment = deploy(&config, OrdersService::default()).await?;
            match deployment.client.get_total(order_id).await? {
                Some(total) => println!("order {order_id}: total {total}"),
                None => println!("order {order_id}: no total"),
            }
            deployment.shutdown().await;
        }
        Commands::Log { order_id } => {
            let deployment = deploy(&config, OrdersService::default()).await?;
            deployment.client.log_access(order_id).await?;
            let logged = tokio::time::timeout(LOG_WAIT, async {
                while deployment.service.accesses() == 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
            deployment.shutdown().await;
            logged.with_context(|| {
                format!("order {order_id}: access not logged within {LOG_WAIT:?}")
            })?;
            println!("order {order_id}: access logged");
        }
        Commands::Missing { timeout_ms } => {
            let deployment = deploy(&config, OrdersService::default()).await?;
            let options = config
                .client
                .call_options()
                .with_timeout(Duration::from_millis(timeout_ms));
            let result = deployment
                .client
                .rpc()
                .call_sync_with::<i64>("getTotals", (42,), options)
                .await;
            report_failure(result)?;
            deployment.shutdown().await;
        }
        Commands::Slow { latency_ms } => {
            let service = OrdersService::with_latency(Duration::from_millis(latency_ms));
            let deployment = deploy(&config, service).await?;
            let result = deployment.client.get_total(42).await;
            report_failure(result)?;
            deployment.shutdown().await;
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn report_failure<T: std::fmt::Debug>(result: Result<T, RpcError>) -> anyhow::Result<()> {
    match result {
        Ok(value) => println!("unexpected success: {value:?}"),
        Err(e @ RpcError::Timeout { .. }) => {
            warn!(error = %e, "call timed out");
            println!("{e}");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

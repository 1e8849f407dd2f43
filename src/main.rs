use checkout_payments::application::{
    CheckoutService, EventObserver, PaymentService, PaymentWorker, QueueAdmin, WorkerPool,
    wait_until_drained,
};
use checkout_payments::config::EngineConfig;
use checkout_payments::domain::payment::{CreatePayment, PaymentStatus};
use checkout_payments::domain::ports::{
    CheckoutStoreRef, PaymentGatewayRef, PaymentStoreRef, ProductCatalogRef, UserDirectoryRef,
};
use checkout_payments::infrastructure::gateway::SimulatedGateway;
use checkout_payments::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryCheckoutStore, InMemoryPaymentStore,
};
use checkout_payments::interfaces::csv::catalog_reader::CatalogReader;
use checkout_payments::interfaces::csv::order_reader::{OrderLine, OrderReader, group_orders};
use checkout_payments::interfaces::csv::payment_writer::{PaymentRow, PaymentWriter};
use checkout_payments::queue::{
    InMemoryJobQueue, JobQueueRef, NOTIFICATION_QUEUE, NotificationType, PAYMENT_QUEUE,
};
use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Orders CSV file: order,user_id,product_id,quantity,method[,transaction_id]
    orders: PathBuf,

    /// Products CSV file: id,name,price,stock
    #[arg(long)]
    products: PathBuf,

    /// Users CSV file: id,name,email
    #[arg(long)]
    users: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON configuration file; missing fields take defaults.
    #[arg(long, env = "CHECKOUT_PAYMENTS_CONFIG")]
    config: Option<PathBuf>,

    /// Concurrent workers per queue.
    #[arg(long, env = "CHECKOUT_PAYMENTS_WORKERS")]
    workers: Option<usize>,

    /// Probability in [0, 1] that the simulated gateway approves a charge.
    #[arg(long, env = "CHECKOUT_PAYMENTS_SUCCESS_RATE")]
    success_rate: Option<f64>,

    /// Fixed simulated gateway latency in milliseconds.
    #[arg(long, env = "CHECKOUT_PAYMENTS_GATEWAY_LATENCY_MS")]
    gateway_latency_ms: Option<u64>,

    /// Enqueue a success/failure notification for every settled payment.
    #[arg(long)]
    notify: bool,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path).into_diagnostic()?,
            None => EngineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.worker.concurrency = workers;
        }
        if let Some(rate) = self.success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(miette!("--success-rate must be between 0 and 1, got {}", rate));
            }
            config.gateway.success_rate = rate;
        }
        if let Some(latency) = self.gateway_latency_ms {
            config.gateway.min_latency_ms = latency;
            config.gateway.max_latency_ms = latency;
        }
        Ok(config)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_stores(db_path: Option<&Path>) -> Result<(CheckoutStoreRef, PaymentStoreRef)> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            use checkout_payments::infrastructure::rocksdb::RocksDBStore;
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => Err(miette!(
            "--db-path {} requires the storage-rocksdb feature",
            path.display()
        )),
        None => Ok((
            Arc::new(InMemoryCheckoutStore::new()),
            Arc::new(InMemoryPaymentStore::new()),
        )),
    }
}

async fn load_catalog(products: &Path, users: &Path) -> Result<InMemoryCatalog> {
    let catalog = InMemoryCatalog::new();

    let file = File::open(products).into_diagnostic()?;
    for product in CatalogReader::new(file).products() {
        match product {
            Ok(product) => catalog.add_product(product).await,
            Err(e) => warn!(error = %e, "Skipping product row"),
        }
    }

    let file = File::open(users).into_diagnostic()?;
    for user in CatalogReader::new(file).users() {
        match user {
            Ok(user) => catalog.add_user(user).await,
            Err(e) => warn!(error = %e, "Skipping user row"),
        }
    }
    Ok(catalog)
}

fn read_order_lines(path: &Path) -> Result<Vec<OrderLine>> {
    let file = File::open(path).into_diagnostic()?;
    let mut lines = Vec::new();
    for line in OrderReader::new(file).lines() {
        match line {
            Ok(line) => lines.push(line),
            Err(e) => warn!(error = %e, "Skipping order row"),
        }
    }
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.engine_config()?;

    let (checkouts, payments) = open_stores(cli.db_path.as_deref())?;
    let catalog = load_catalog(&cli.products, &cli.users).await?;
    let users: UserDirectoryRef = Arc::new(catalog.clone());
    let products: ProductCatalogRef = Arc::new(catalog);

    let payment_queue: JobQueueRef = Arc::new(InMemoryJobQueue::new(PAYMENT_QUEUE));
    let notification_queue: JobQueueRef = Arc::new(InMemoryJobQueue::new(NOTIFICATION_QUEUE));
    let queues = [payment_queue.clone(), notification_queue.clone()];

    let gateway: PaymentGatewayRef = Arc::new(SimulatedGateway::new(config.gateway.clone()));
    let worker = Arc::new(PaymentWorker::new(payments.clone(), gateway, &config));
    let observer = EventObserver::new();
    let pool = WorkerPool::start(worker, &observer, &queues, config.worker.concurrency);

    let checkout_service = CheckoutService::new(checkouts.clone(), users.clone(), products);
    let payment_service = PaymentService::new(
        payments,
        checkouts,
        users,
        payment_queue.clone(),
        notification_queue.clone(),
        config.clone(),
    );

    let orders = group_orders(read_order_lines(&cli.orders)?).into_diagnostic()?;
    let mut submitted = Vec::new();
    for order in orders {
        let checkout = match checkout_service.create(order.checkout).await {
            Ok(checkout) => checkout,
            Err(e) => {
                error!(order = %order.reference, error = %e, "Checkout rejected");
                continue;
            }
        };
        let mut request = CreatePayment::new(checkout.id.to_string(), order.method);
        request.transaction_id = order.transaction_id;
        match payment_service.create(request).await {
            Ok(payment) => submitted.push((order.reference, payment.id)),
            Err(e) => error!(order = %order.reference, error = %e, "Payment rejected"),
        }
    }

    wait_until_drained(&queues, DRAIN_POLL).await.into_diagnostic()?;

    let mut rows = Vec::with_capacity(submitted.len());
    for (reference, payment_id) in &submitted {
        let payment = payment_service
            .find_one(&payment_id.to_string())
            .await
            .into_diagnostic()?;
        if cli.notify {
            let kind = match payment.status {
                PaymentStatus::Completed => Some(NotificationType::PaymentSuccess),
                PaymentStatus::Failed => Some(NotificationType::PaymentFailure),
                _ => None,
            };
            if let Some(kind) = kind {
                payment_service
                    .send_payment_notification(&payment_id.to_string(), kind)
                    .await
                    .into_diagnostic()?;
            }
        }
        rows.push(PaymentRow::new(reference, &payment));
    }

    wait_until_drained(&queues, DRAIN_POLL).await.into_diagnostic()?;
    pool.shutdown().await.into_diagnostic()?;

    for queue in &queues {
        let admin = QueueAdmin::new(queue.clone(), config.clean.clone());
        let counts = admin.status().await.into_diagnostic()?;
        let cleaned = admin.clean().await.into_diagnostic()?;
        info!(queue = %queue.name(), ?counts, ?cleaned, "Queue finished");
    }
    info!(metrics = ?observer.metrics().snapshot(), "Event totals");

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(rows).into_diagnostic()?;

    Ok(())
}

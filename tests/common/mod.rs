#![allow(dead_code)]

use async_trait::async_trait;
use checkout_payments::application::{
    CheckoutService, EventObserver, MetricsSnapshot, PaymentService, PaymentWorker, WorkerPool,
    wait_until_drained,
};
use checkout_payments::config::EngineConfig;
use checkout_payments::domain::catalog::{Product, User};
use checkout_payments::domain::ids::{ProductId, UserId};
use checkout_payments::domain::money::Money;
use checkout_payments::domain::ports::{ChargeRequest, GatewayOutcome, PaymentGateway};
use checkout_payments::error::Result;
use checkout_payments::infrastructure::gateway::generate_transaction_id;
use checkout_payments::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryCheckoutStore, InMemoryPaymentStore,
};
use checkout_payments::queue::{InMemoryJobQueue, JobQueueRef, NOTIFICATION_QUEUE, PAYMENT_QUEUE};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

pub const DECLINE_REASON: &str = "Card declined";

/// Gateway whose answer can be flipped between approve and decline.
///
/// When holding, each charge signals `entered` and then waits for `release`.
#[derive(Default)]
pub struct ToggleGateway {
    approve: AtomicBool,
    calls: AtomicUsize,
    hold: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl ToggleGateway {
    pub fn approving(approve: bool) -> Arc<Self> {
        let gateway = Self::default();
        gateway.approve.store(approve, Ordering::SeqCst);
        Arc::new(gateway)
    }

    pub fn holding(approve: bool) -> Arc<Self> {
        let gateway = Self::approving(approve);
        gateway.hold.store(true, Ordering::SeqCst);
        gateway
    }

    /// Resolves once a charge is in flight.
    pub async fn charge_started(&self) {
        self.entered.notified().await;
    }

    /// Lets the in-flight charge return.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn set_approve(&self, approve: bool) {
        self.approve.store(approve, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ToggleGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.approve.load(Ordering::SeqCst) {
            Ok(GatewayOutcome::Approved {
                transaction_id: request
                    .transaction_id
                    .clone()
                    .unwrap_or_else(generate_transaction_id),
                response: "approved".to_string(),
            })
        } else {
            Ok(GatewayOutcome::Declined {
                reason: DECLINE_REASON.to_string(),
            })
        }
    }
}

/// The whole processing core wired on in-memory adapters, with workers
/// running in the background.
pub struct Harness {
    pub checkouts: CheckoutService,
    pub payments: PaymentService,
    pub catalog: InMemoryCatalog,
    pub gateway: Arc<ToggleGateway>,
    pub payment_queue: JobQueueRef,
    pub notification_queue: JobQueueRef,
    pub observer: EventObserver,
    pool: WorkerPool,
}

impl Harness {
    pub fn start(gateway: Arc<ToggleGateway>) -> Self {
        let mut config = EngineConfig::default();
        config.notifications.send_latency_ms = 0;
        Self::with_config(gateway, config)
    }

    pub fn with_config(gateway: Arc<ToggleGateway>, config: EngineConfig) -> Self {
        let catalog = InMemoryCatalog::new();
        let checkout_store = Arc::new(InMemoryCheckoutStore::new());
        let payment_store = Arc::new(InMemoryPaymentStore::new());
        let payment_queue: JobQueueRef = Arc::new(InMemoryJobQueue::new(PAYMENT_QUEUE));
        let notification_queue: JobQueueRef = Arc::new(InMemoryJobQueue::new(NOTIFICATION_QUEUE));

        let worker = Arc::new(PaymentWorker::new(
            payment_store.clone(),
            gateway.clone(),
            &config,
        ));
        let observer = EventObserver::new();
        let pool = WorkerPool::start(
            worker,
            &observer,
            &[payment_queue.clone(), notification_queue.clone()],
            config.worker.concurrency,
        );

        let checkouts = CheckoutService::new(
            checkout_store.clone(),
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
        );
        let payments = PaymentService::new(
            payment_store,
            checkout_store,
            Arc::new(catalog.clone()),
            payment_queue.clone(),
            notification_queue.clone(),
            config,
        );

        Self {
            checkouts,
            payments,
            catalog,
            gateway,
            payment_queue,
            notification_queue,
            observer,
            pool,
        }
    }

    pub async fn seed_user(&self, email: &str) -> UserId {
        let id = UserId::new();
        self.catalog
            .add_user(User {
                id,
                name: "Test User".to_string(),
                email: email.to_string(),
            })
            .await;
        id
    }

    pub async fn seed_product(&self, price: Decimal, stock: u32) -> ProductId {
        let id = ProductId::new();
        self.catalog
            .add_product(Product {
                id,
                name: "Test Product".to_string(),
                price: Money::new(price),
                stock,
            })
            .await;
        id
    }

    /// Waits until both queues have nothing waiting, delayed or active.
    pub async fn drain(&self) {
        wait_until_drained(
            &[self.payment_queue.clone(), self.notification_queue.clone()],
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    }

    /// Stops the workers and returns the observer totals.
    pub async fn shutdown(self) -> MetricsSnapshot {
        let metrics = self.observer.metrics();
        self.pool.shutdown().await.unwrap();
        metrics.snapshot()
    }
}

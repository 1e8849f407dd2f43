use crate::domain::catalog::{Product, User};
use crate::domain::checkout::Checkout;
use crate::domain::ids::{CheckoutId, PaymentId, ProductId, UserId};
use crate::domain::page::PageRequest;
use crate::domain::payment::{Payment, PaymentStatus, Transition};
use crate::domain::ports::{
    CasOutcome, CheckoutFilter, CheckoutStore, PaymentStore, ProductCatalog, UserDirectory,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sorts newest first; insertion order breaks ties between equal timestamps.
fn newest_first<T>(rows: &mut [(u64, T)], created_at: impl Fn(&T) -> chrono::DateTime<Utc>) {
    rows.sort_by(|(seq_a, a), (seq_b, b)| {
        created_at(b)
            .cmp(&created_at(a))
            .then_with(|| seq_b.cmp(seq_a))
    });
}

fn paginate<T>(rows: Vec<(u64, T)>, page: PageRequest) -> (Vec<T>, usize) {
    let total = rows.len();
    let items = rows
        .into_iter()
        .skip(page.offset())
        .take(page.limit())
        .map(|(_, row)| row)
        .collect();
    (items, total)
}

#[derive(Default)]
struct CheckoutTable {
    rows: HashMap<CheckoutId, (u64, Checkout)>,
    next_seq: u64,
}

/// A thread-safe in-memory store for checkouts.
///
/// The header and its items live in the same map entry, so every write of
/// the aggregate is atomic.
#[derive(Default, Clone)]
pub struct InMemoryCheckoutStore {
    table: Arc<RwLock<CheckoutTable>>,
}

impl InMemoryCheckoutStore {
    /// Creates a new, empty in-memory checkout store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn insert(&self, checkout: Checkout) -> Result<()> {
        let mut table = self.table.write().await;
        table.next_seq += 1;
        let seq = table.next_seq;
        table.rows.insert(checkout.id, (seq, checkout));
        Ok(())
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<Checkout>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).map(|(_, checkout)| checkout.clone()))
    }

    async fn update(&self, checkout: Checkout) -> Result<()> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&checkout.id) {
            Some((_, stored)) => {
                *stored = checkout;
                Ok(())
            }
            None => Err(PaymentError::not_found(CheckoutId::LABEL, checkout.id)),
        }
    }

    async fn list(
        &self,
        filter: CheckoutFilter,
        page: PageRequest,
    ) -> Result<(Vec<Checkout>, usize)> {
        let table = self.table.read().await;
        let mut rows: Vec<(u64, Checkout)> = table
            .rows
            .values()
            .filter(|(_, checkout)| filter.matches(checkout))
            .cloned()
            .collect();
        newest_first(&mut rows, |checkout| checkout.created_at);
        Ok(paginate(rows, page))
    }

    async fn delete(&self, id: CheckoutId) -> Result<bool> {
        let mut table = self.table.write().await;
        Ok(table.rows.remove(&id).is_some())
    }
}

#[derive(Default)]
struct PaymentTable {
    rows: HashMap<PaymentId, (u64, Payment)>,
    by_checkout: HashMap<CheckoutId, PaymentId>,
    next_seq: u64,
}

/// A thread-safe in-memory store for payments.
///
/// The checkout uniqueness index and the compare-and-set transition are both
/// evaluated under the table's write lock.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut table = self.table.write().await;
        if table.by_checkout.contains_key(&payment.checkout_id) {
            return Err(PaymentError::DuplicatePayment(
                payment.checkout_id.to_string(),
            ));
        }
        table.next_seq += 1;
        let seq = table.next_seq;
        table.by_checkout.insert(payment.checkout_id, payment.id);
        table.rows.insert(payment.id, (seq, payment));
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).map(|(_, payment)| payment.clone()))
    }

    async fn find_by_checkout(&self, checkout_id: CheckoutId) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .by_checkout
            .get(&checkout_id)
            .and_then(|id| table.rows.get(id))
            .map(|(_, payment)| payment.clone()))
    }

    async fn list(&self, page: PageRequest) -> Result<(Vec<Payment>, usize)> {
        let table = self.table.read().await;
        let mut rows: Vec<(u64, Payment)> = table.rows.values().cloned().collect();
        newest_first(&mut rows, |payment| payment.created_at);
        Ok(paginate(rows, page))
    }

    async fn transition(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        transition: Transition,
    ) -> Result<CasOutcome> {
        let mut table = self.table.write().await;
        let Some((_, payment)) = table.rows.get_mut(&id) else {
            return Ok(CasOutcome::Missing);
        };
        if payment.status != expected {
            return Ok(CasOutcome::StatusMismatch(payment.status));
        }
        payment.apply(&transition, Utc::now())?;
        Ok(CasOutcome::Applied(payment.clone()))
    }
}

#[derive(Default)]
struct CatalogTables {
    users: HashMap<UserId, User>,
    products: HashMap<ProductId, Product>,
}

/// In-memory stand-in for the user directory and product catalog.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    tables: Arc<RwLock<CatalogTables>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    pub async fn add_product(&self, product: Product) {
        self.tables
            .write()
            .await
            .products
            .insert(product.id, product);
    }

    /// Overwrites the stock level of an existing product.
    pub async fn set_stock(&self, id: ProductId, stock: u32) -> Result<()> {
        let mut tables = self.tables.write().await;
        let product = tables
            .products
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found(ProductId::LABEL, id))?;
        product.stock = stock;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryCatalog {
    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }
}

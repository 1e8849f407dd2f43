use super::catalog::{Product, User};
use super::checkout::Checkout;
use super::ids::{CheckoutId, PaymentId, ProductId, UserId};
use super::money::Money;
use super::page::PageRequest;
use super::payment::{Payment, PaymentMethod, PaymentStatus, Transition};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Existence/identity lookup for users. Owned outside this core.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;
}

/// Price and stock lookup for products. Owned outside this core.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutFilter {
    All,
    ByUser(UserId),
}

impl CheckoutFilter {
    pub fn matches(&self, checkout: &Checkout) -> bool {
        match self {
            CheckoutFilter::All => true,
            CheckoutFilter::ByUser(user_id) => checkout.user_id == *user_id,
        }
    }
}

/// Persistence for the checkout aggregate (header + items).
///
/// `insert` and `update` write the header and its whole item set as one
/// logical write. Listings are ordered by creation time, newest first.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    async fn insert(&self, checkout: Checkout) -> Result<()>;
    async fn get(&self, id: CheckoutId) -> Result<Option<Checkout>>;
    async fn update(&self, checkout: Checkout) -> Result<()>;
    async fn list(&self, filter: CheckoutFilter, page: PageRequest)
    -> Result<(Vec<Checkout>, usize)>;
    /// Deletes the items and then the header. Returns `false` if absent.
    async fn delete(&self, id: CheckoutId) -> Result<bool>;
}

/// Result of a compare-and-set on a payment's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied(Payment),
    StatusMismatch(PaymentStatus),
    Missing,
}

/// Persistence for payments.
///
/// Implementations must enforce at most one payment per checkout inside
/// `insert`, and must make `transition` an atomic read-modify-write.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `DuplicatePayment` if the checkout already has a payment.
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn find_by_checkout(&self, checkout_id: CheckoutId) -> Result<Option<Payment>>;
    async fn list(&self, page: PageRequest) -> Result<(Vec<Payment>, usize)>;
    /// Applies `transition` only if the stored status equals `expected`.
    async fn transition(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        transition: Transition,
    ) -> Result<CasOutcome>;
}

/// What the worker asks the external payment gateway to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved {
        transaction_id: String,
        response: String,
    },
    Declined {
        reason: String,
    },
}

/// External payment gateway. `Err` means the call itself broke; a refused
/// charge is a `Declined` outcome.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayOutcome>;
}

pub type UserDirectoryRef = Arc<dyn UserDirectory>;
pub type ProductCatalogRef = Arc<dyn ProductCatalog>;
pub type CheckoutStoreRef = Arc<dyn CheckoutStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

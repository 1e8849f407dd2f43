use crate::domain::checkout::Checkout;
use crate::domain::ids::{CheckoutId, PaymentId};
use crate::domain::page::PageRequest;
use crate::domain::payment::{Payment, PaymentStatus, Transition};
use crate::domain::ports::{CasOutcome, CheckoutFilter, CheckoutStore, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for checkout aggregates (header and items in one value).
pub const CF_CHECKOUTS: &str = "checkouts";
/// Column Family for payments.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping a checkout id to its payment id.
pub const CF_PAYMENTS_BY_CHECKOUT: &str = "payments_by_checkout";

/// A persistent store implementation using RocksDB.
///
/// Keys are the raw UUID bytes and values are JSON. Read-modify-write
/// operations (the checkout uniqueness check, status compare-and-set,
/// checkout update) are serialized through a single writer lock, and a new
/// payment is written together with its checkout index in one batch.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// the column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_CHECKOUTS, CF_PAYMENTS, CF_PAYMENTS_BY_CHECKOUT]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| {
                PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                    "RocksDB iteration error: {}",
                    e
                ))))
            })?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, encode(value)?)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

fn page_of<T>(rows: Vec<T>, page: PageRequest) -> (Vec<T>, usize) {
    let total = rows.len();
    let items = rows
        .into_iter()
        .skip(page.offset())
        .take(page.limit())
        .collect();
    (items, total)
}

#[async_trait]
impl CheckoutStore for RocksDBStore {
    async fn insert(&self, checkout: Checkout) -> Result<()> {
        self.write(CF_CHECKOUTS, checkout.id.as_uuid().as_bytes(), &checkout)
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<Checkout>> {
        self.read(CF_CHECKOUTS, id.as_uuid().as_bytes())
    }

    async fn update(&self, checkout: Checkout) -> Result<()> {
        let _guard = self.writer.lock().await;
        let key = checkout.id.as_uuid().as_bytes();
        if self.db.get_pinned_cf(self.cf(CF_CHECKOUTS)?, key)?.is_none() {
            return Err(PaymentError::not_found(CheckoutId::LABEL, checkout.id));
        }
        self.write(CF_CHECKOUTS, key, &checkout)
    }

    async fn list(
        &self,
        filter: CheckoutFilter,
        page: PageRequest,
    ) -> Result<(Vec<Checkout>, usize)> {
        let mut rows: Vec<Checkout> = self
            .read_all::<Checkout>(CF_CHECKOUTS)?
            .into_iter()
            .filter(|checkout| filter.matches(checkout))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page_of(rows, page))
    }

    async fn delete(&self, id: CheckoutId) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let cf = self.cf(CF_CHECKOUTS)?;
        let key = id.as_uuid().as_bytes();
        if self.db.get_pinned_cf(cf, key)?.is_none() {
            return Ok(false);
        }
        self.db.delete_cf(cf, key)?;
        Ok(true)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.writer.lock().await;
        let index = self.cf(CF_PAYMENTS_BY_CHECKOUT)?;
        let checkout_key = payment.checkout_id.as_uuid().as_bytes();
        if self.db.get_pinned_cf(index, checkout_key)?.is_some() {
            return Err(PaymentError::DuplicatePayment(
                payment.checkout_id.to_string(),
            ));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.id.as_uuid().as_bytes(),
            encode(&payment)?,
        );
        batch.put_cf(index, checkout_key, payment.id.as_uuid().as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.as_uuid().as_bytes())
    }

    async fn find_by_checkout(&self, checkout_id: CheckoutId) -> Result<Option<Payment>> {
        let index = self.cf(CF_PAYMENTS_BY_CHECKOUT)?;
        match self.db.get_cf(index, checkout_id.as_uuid().as_bytes())? {
            Some(payment_key) => self.read(CF_PAYMENTS, &payment_key),
            None => Ok(None),
        }
    }

    async fn list(&self, page: PageRequest) -> Result<(Vec<Payment>, usize)> {
        let mut rows = self.read_all::<Payment>(CF_PAYMENTS)?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page_of(rows, page))
    }

    async fn transition(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        transition: Transition,
    ) -> Result<CasOutcome> {
        let _guard = self.writer.lock().await;
        let key = id.as_uuid().as_bytes();
        let Some(mut payment) = self.read::<Payment>(CF_PAYMENTS, key)? else {
            return Ok(CasOutcome::Missing);
        };
        if payment.status != expected {
            return Ok(CasOutcome::StatusMismatch(payment.status));
        }
        payment.apply(&transition, Utc::now())?;
        self.write(CF_PAYMENTS, key, &payment)?;
        Ok(CasOutcome::Applied(payment))
    }
}

use super::ids::{CheckoutId, CheckoutItemId, ProductId, UserId};
use super::money::Money;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One requested cart line as supplied by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLine {
    pub product_id: String,
    pub quantity: u32,
}

impl CheckoutLine {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckout {
    pub user_id: String,
    pub items: Vec<CheckoutLine>,
}

/// Partial update. `items`, when present, replaces the whole item set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckout {
    pub user_id: Option<String>,
    pub items: Option<Vec<CheckoutLine>>,
}

/// A validated line whose unit price has been snapshotted from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub id: CheckoutItemId,
    pub checkout_id: CheckoutId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    /// `quantity * unit_price`, fixed at write time.
    pub subtotal: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A priced, itemized cart snapshot awaiting payment.
///
/// Items are owned by the checkout: they are written, replaced and deleted
/// together with it. `total_amount` always equals the sum of item subtotals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub id: CheckoutId,
    pub user_id: UserId,
    pub items: Vec<CheckoutItem>,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkout {
    pub fn new(user_id: UserId, lines: &[PricedLine], now: DateTime<Utc>) -> Result<Self> {
        let mut checkout = Self {
            id: CheckoutId::new(),
            user_id,
            items: Vec::new(),
            total_amount: Money::ZERO,
            created_at: now,
            updated_at: now,
        };
        checkout.replace_items(lines, now)?;
        Ok(checkout)
    }

    /// Drops every current item and rebuilds the set from `lines`,
    /// recomputing the total.
    ///
    /// Fails with `ValidationError`, leaving the checkout untouched, when a
    /// subtotal or the total does not fit in a `Decimal`.
    pub fn replace_items(&mut self, lines: &[PricedLine], now: DateTime<Utc>) -> Result<()> {
        let mut items = Vec::with_capacity(lines.len());
        let mut total = Money::ZERO;
        for line in lines {
            let subtotal = line
                .unit_price
                .checked_mul(line.quantity)
                .ok_or_else(|| out_of_range(line.product_id))?;
            total = total
                .checked_add(subtotal)
                .ok_or_else(|| out_of_range(line.product_id))?;
            items.push(CheckoutItem {
                id: CheckoutItemId::new(),
                checkout_id: self.id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal,
                created_at: now,
                updated_at: now,
            });
        }

        self.items = items;
        self.total_amount = total;
        self.updated_at = now;
        Ok(())
    }
}

fn out_of_range(product_id: ProductId) -> PaymentError {
    PaymentError::ValidationError(format!(
        "Amount for product {} exceeds the supported range",
        product_id
    ))
}

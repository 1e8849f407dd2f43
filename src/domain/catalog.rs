//! Read-only views of the collaborators owned outside this core:
//! the user directory and the product catalog (stock ledger).

use super::ids::{ProductId, UserId};
use super::money::Money;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// Snapshot of a product as seen by the stock ledger at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl Product {
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stock_check_is_inclusive() {
        let product = Product {
            id: ProductId::new(),
            name: "Keyboard".to_string(),
            price: Money::new(dec!(99.99)),
            stock: 10,
        };
        assert!(product.has_stock_for(10));
        assert!(!product.has_stock_for(11));
    }
}

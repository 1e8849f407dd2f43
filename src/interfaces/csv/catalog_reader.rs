use crate::domain::catalog::{Product, User};
use crate::domain::money::Money;
use crate::error::{PaymentError, Result};
use std::io::Read;

/// Reads catalog snapshots (products or users) from a CSV source.
///
/// Products are expected as `id,name,price,stock` and users as
/// `id,name,email`. Whitespace around fields is trimmed.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes products, rejecting negative prices.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader.into_deserialize().map(|result| {
            let mut product: Product = result.map_err(PaymentError::from)?;
            product.price = Money::price(product.price.value())?;
            Ok(product)
        })
    }

    pub fn users(self) -> impl Iterator<Item = Result<User>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

use crate::domain::checkout::{Checkout, CheckoutLine, CreateCheckout, PricedLine, UpdateCheckout};
use crate::domain::ids::{CheckoutId, ProductId, UserId, parse_id};
use crate::domain::page::{Page, PageRequest};
use crate::domain::ports::{
    CheckoutFilter, CheckoutStoreRef, ProductCatalogRef, UserDirectoryRef,
};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

/// Whether pricing a cart also verifies the live stock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StockCheck {
    Enforce,
    Skip,
}

/// Turns carts into priced, persisted checkouts.
///
/// Stock is verified per line against the catalog snapshot read while the
/// request is processed; nothing is reserved, so two concurrent checkouts
/// for the same product may both pass.
pub struct CheckoutService {
    checkouts: CheckoutStoreRef,
    users: UserDirectoryRef,
    products: ProductCatalogRef,
}

impl CheckoutService {
    pub fn new(
        checkouts: CheckoutStoreRef,
        users: UserDirectoryRef,
        products: ProductCatalogRef,
    ) -> Self {
        Self {
            checkouts,
            users,
            products,
        }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create(&self, request: CreateCheckout) -> Result<Checkout> {
        let user_id: UserId = parse_id(&request.user_id)?;
        let lines = parse_lines(&request.items)?;

        self.require_user(user_id).await?;
        let priced = self.price_lines(&lines, StockCheck::Enforce).await?;

        let checkout = Checkout::new(user_id, &priced, Utc::now())?;
        self.checkouts.insert(checkout.clone()).await?;

        info!(
            checkout_id = %checkout.id,
            items = checkout.items.len(),
            total = %checkout.total_amount,
            "Checkout created"
        );
        Ok(checkout)
    }

    pub async fn find_all(&self, page: PageRequest) -> Result<Page<Checkout>> {
        let (items, total) = self.checkouts.list(CheckoutFilter::All, page).await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn find_one(&self, id: &str) -> Result<Checkout> {
        let id: CheckoutId = parse_id(id)?;
        self.load(id).await
    }

    pub async fn find_by_user(&self, user_id: &str, page: PageRequest) -> Result<Page<Checkout>> {
        let user_id: UserId = parse_id(user_id)?;
        let (items, total) = self
            .checkouts
            .list(CheckoutFilter::ByUser(user_id), page)
            .await?;
        Ok(Page::new(items, total, page))
    }

    /// Updates the owner and/or replaces the whole item set.
    ///
    /// Unlike `create`, replacing items does not check stock.
    #[instrument(skip(self, request))]
    pub async fn update(&self, id: &str, request: UpdateCheckout) -> Result<Checkout> {
        let id: CheckoutId = parse_id(id)?;
        let user_id: Option<UserId> = request.user_id.as_deref().map(parse_id).transpose()?;
        let lines = request.items.as_deref().map(parse_lines).transpose()?;

        let mut checkout = self.load(id).await?;
        let now = Utc::now();

        if let Some(user_id) = user_id {
            self.require_user(user_id).await?;
            checkout.user_id = user_id;
        }

        match lines {
            Some(lines) => {
                let priced = self.price_lines(&lines, StockCheck::Skip).await?;
                checkout.replace_items(&priced, now)?;
            }
            None => checkout.updated_at = now,
        }

        self.checkouts.update(checkout.clone()).await?;
        info!(checkout_id = %checkout.id, total = %checkout.total_amount, "Checkout updated");
        Ok(checkout)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let id: CheckoutId = parse_id(id)?;
        if !self.checkouts.delete(id).await? {
            return Err(PaymentError::not_found(CheckoutId::LABEL, id));
        }
        info!(checkout_id = %id, "Checkout removed");
        Ok(())
    }

    async fn load(&self, id: CheckoutId) -> Result<Checkout> {
        self.checkouts
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found(CheckoutId::LABEL, id))
    }

    async fn require_user(&self, id: UserId) -> Result<()> {
        match self.users.find_user(id).await? {
            Some(_) => Ok(()),
            None => Err(PaymentError::not_found(UserId::LABEL, id)),
        }
    }

    async fn price_lines(
        &self,
        lines: &[(ProductId, u32)],
        stock: StockCheck,
    ) -> Result<Vec<PricedLine>> {
        let mut priced = Vec::with_capacity(lines.len());
        for &(product_id, quantity) in lines {
            let product = self
                .products
                .find_product(product_id)
                .await?
                .ok_or_else(|| PaymentError::not_found(ProductId::LABEL, product_id))?;

            if stock == StockCheck::Enforce && !product.has_stock_for(quantity) {
                return Err(PaymentError::InsufficientStock {
                    product: product.name,
                    available: product.stock,
                    requested: quantity,
                });
            }

            debug!(product_id = %product_id, quantity, price = %product.price, "Line priced");
            priced.push(PricedLine {
                product_id,
                quantity,
                unit_price: product.price,
            });
        }
        Ok(priced)
    }
}

/// Validates every requested line before any lookup happens.
fn parse_lines(lines: &[CheckoutLine]) -> Result<Vec<(ProductId, u32)>> {
    if lines.is_empty() {
        return Err(PaymentError::ValidationError(
            "Checkout must contain at least one item".to_string(),
        ));
    }
    lines
        .iter()
        .map(|line| {
            let product_id: ProductId = parse_id(&line.product_id)?;
            if line.quantity == 0 {
                return Err(PaymentError::ValidationError(format!(
                    "Quantity for product {} must be at least 1",
                    product_id
                )));
            }
            Ok((product_id, line.quantity))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{Product, User};
    use crate::domain::money::Money;
    use crate::domain::ports::CheckoutStore;
    use crate::infrastructure::in_memory::{InMemoryCatalog, InMemoryCheckoutStore};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        service: CheckoutService,
        catalog: InMemoryCatalog,
        store: InMemoryCheckoutStore,
        user: UserId,
    }

    async fn fixture() -> Fixture {
        let catalog = InMemoryCatalog::new();
        let store = InMemoryCheckoutStore::new();
        let user = UserId::new();
        catalog
            .add_user(User {
                id: user,
                name: "Test User".to_string(),
                email: "test@example.com".to_string(),
            })
            .await;
        let service = CheckoutService::new(
            Arc::new(store.clone()),
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
        );
        Fixture {
            service,
            catalog,
            store,
            user,
        }
    }

    async fn product(catalog: &InMemoryCatalog, price: Decimal, stock: u32) -> ProductId {
        let id = ProductId::new();
        catalog
            .add_product(Product {
                id,
                name: format!("Product {}", id),
                price: Money::new(price),
                stock,
            })
            .await;
        id
    }

    fn create_request(user: UserId, lines: &[(ProductId, u32)]) -> CreateCheckout {
        CreateCheckout {
            user_id: user.to_string(),
            items: lines
                .iter()
                .map(|(id, qty)| CheckoutLine::new(id.to_string(), *qty))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_computes_total() {
        let fx = fixture().await;
        let a = product(&fx.catalog, dec!(10.99), 100).await;
        let b = product(&fx.catalog, dec!(25.50), 100).await;

        let checkout = fx
            .service
            .create(create_request(fx.user, &[(a, 2), (b, 1)]))
            .await
            .unwrap();

        assert_eq!(checkout.total_amount, Money::new(dec!(47.48)));
        assert_eq!(checkout.items.len(), 2);
        assert_eq!(fx.service.find_one(&checkout.id.to_string()).await.unwrap(), checkout);
    }

    #[tokio::test]
    async fn test_create_rejects_insufficient_stock_and_persists_nothing() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(99.99), 100).await;

        let result = fx.service.create(create_request(fx.user, &[(p, 200)])).await;
        match result {
            Err(PaymentError::InsufficientStock {
                available,
                requested,
                ..
            }) => assert_eq!((available, requested), (100, 200)),
            other => panic!("expected insufficient stock, got {:?}", other),
        }
        let (_, total) = fx
            .store
            .list(CheckoutFilter::All, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_total_beyond_decimal_range() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(10000000000000000000000000), 200_000).await;

        let result = fx.service.create(create_request(fx.user, &[(p, 100_000)])).await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
        let (_, total) = fx
            .store
            .list(CheckoutFilter::All, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_create_validates_ids_before_lookup() {
        let fx = fixture().await;
        let result = fx
            .service
            .create(CreateCheckout {
                user_id: "not-a-uuid".to_string(),
                items: vec![CheckoutLine::new(ProductId::new().to_string(), 1)],
            })
            .await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));

        let result = fx
            .service
            .create(CreateCheckout {
                user_id: fx.user.to_string(),
                items: vec![CheckoutLine::new("bad-product", 1)],
            })
            .await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_create_unknown_user_or_product_is_not_found() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(1.00), 1).await;

        let result = fx
            .service
            .create(create_request(UserId::new(), &[(p, 1)]))
            .await;
        assert!(matches!(result, Err(PaymentError::NotFound { entity: "user", .. })));

        let result = fx
            .service
            .create(create_request(fx.user, &[(ProductId::new(), 1)]))
            .await;
        assert!(matches!(result, Err(PaymentError::NotFound { entity: "product", .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_cart_and_zero_quantity() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(1.00), 1).await;
        assert!(matches!(
            fx.service.create(create_request(fx.user, &[])).await,
            Err(PaymentError::ValidationError(_))
        ));
        assert!(matches!(
            fx.service.create(create_request(fx.user, &[(p, 0)])).await,
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_update_replaces_items_without_stock_check() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(10.00), 5).await;
        let q = product(&fx.catalog, dec!(3.00), 1).await;
        let checkout = fx
            .service
            .create(create_request(fx.user, &[(p, 2)]))
            .await
            .unwrap();

        // Quantity 4 exceeds q's stock of 1; update does not re-check stock.
        let updated = fx
            .service
            .update(
                &checkout.id.to_string(),
                UpdateCheckout {
                    user_id: None,
                    items: Some(vec![CheckoutLine::new(q.to_string(), 4)]),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.items.len(), 1);
        assert_eq!(updated.items[0].product_id, q);
        assert_eq!(updated.total_amount, Money::new(dec!(12.00)));
        assert_eq!(updated.created_at, checkout.created_at);
    }

    #[tokio::test]
    async fn test_update_without_items_keeps_items() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(10.00), 5).await;
        let checkout = fx
            .service
            .create(create_request(fx.user, &[(p, 1)]))
            .await
            .unwrap();

        let updated = fx
            .service
            .update(&checkout.id.to_string(), UpdateCheckout::default())
            .await
            .unwrap();
        assert_eq!(updated.items, checkout.items);
        assert_eq!(updated.total_amount, checkout.total_amount);
    }

    #[tokio::test]
    async fn test_update_unknown_checkout_or_product() {
        let fx = fixture().await;
        let result = fx
            .service
            .update(&CheckoutId::new().to_string(), UpdateCheckout::default())
            .await;
        assert!(matches!(result, Err(PaymentError::NotFound { .. })));

        let p = product(&fx.catalog, dec!(10.00), 5).await;
        let checkout = fx
            .service
            .create(create_request(fx.user, &[(p, 1)]))
            .await
            .unwrap();
        let result = fx
            .service
            .update(
                &checkout.id.to_string(),
                UpdateCheckout {
                    user_id: None,
                    items: Some(vec![CheckoutLine::new(ProductId::new().to_string(), 1)]),
                },
            )
            .await;
        assert!(matches!(result, Err(PaymentError::NotFound { .. })));
        // The failed update left the original items in place.
        let stored = fx.service.find_one(&checkout.id.to_string()).await.unwrap();
        assert_eq!(stored.items, checkout.items);
    }

    #[tokio::test]
    async fn test_remove() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(10.00), 5).await;
        let checkout = fx
            .service
            .create(create_request(fx.user, &[(p, 1)]))
            .await
            .unwrap();
        let id = checkout.id.to_string();

        fx.service.remove(&id).await.unwrap();
        assert!(matches!(
            fx.service.find_one(&id).await,
            Err(PaymentError::NotFound { .. })
        ));
        assert!(matches!(
            fx.service.remove(&id).await,
            Err(PaymentError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_pagination() {
        let fx = fixture().await;
        let p = product(&fx.catalog, dec!(1.00), 1000).await;
        for _ in 0..15 {
            fx.service
                .create(create_request(fx.user, &[(p, 1)]))
                .await
                .unwrap();
        }

        let first = fx
            .service
            .find_all(PageRequest::new(1, 10).unwrap())
            .await
            .unwrap();
        assert_eq!((first.items.len(), first.total), (10, 15));
        assert_eq!((first.page, first.limit), (1, 10));

        let second = fx
            .service
            .find_all(PageRequest::new(2, 10).unwrap())
            .await
            .unwrap();
        assert_eq!((second.items.len(), second.total), (5, 15));

        let by_user = fx
            .service
            .find_by_user(&fx.user.to_string(), PageRequest::new(1, 20).unwrap())
            .await
            .unwrap();
        assert_eq!(by_user.items.len(), 15);
        assert!(
            by_user
                .items
                .windows(2)
                .all(|pair| pair[0].created_at >= pair[1].created_at)
        );
    }
}

//! Order ledger: creation with price snapshots and status transitions.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, instrument};

use starshop_core::{OrderId, OrderStatus, ProductId, StarAmount, UserId};

use crate::db::{CatalogStore, OrderStore, RepositoryError};
use crate::models::{NewOrder, Order, OrderStats};

/// Largest quantity accepted for one order.
pub const MAX_QUANTITY: i32 = 100;

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order does not exist.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// The referenced product does not exist.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// Quantity outside `1..=MAX_QUANTITY`.
    #[error("invalid quantity {0}")]
    InvalidQuantity(i32),

    /// The order is in a state that does not allow the operation.
    #[error("order is {0}")]
    InvalidStatus(OrderStatus),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of settling a payment against an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// This call moved the order from pending to paid.
    Applied(Order),
    /// The order was already paid; nothing changed.
    AlreadyPaid(Order),
}

impl Settlement {
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Applied(order) | Self::AlreadyPaid(order) => order,
        }
    }
}

/// Order lifecycle. Authorization is the caller's job.
#[derive(Clone)]
pub struct OrderLedger {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn CatalogStore>,
}

impl OrderLedger {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderStore>, products: Arc<dyn CatalogStore>) -> Self {
        Self { orders, products }
    }

    /// Create a pending order, snapshotting the product's current title and
    /// price. `total = price * quantity` is computed here and never again.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::ProductNotFound` or `OrderError::InvalidQuantity`
    /// for bad input, `OrderError::Repository` if the store fails.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn create(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Order, OrderError> {
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(OrderError::InvalidQuantity(quantity));
        }

        let product = self
            .products
            .get_product(product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(product_id))?;

        let total = product.price * Decimal::from(quantity);
        let order = self
            .orders
            .insert(&NewOrder {
                user_id,
                product_id,
                product_title: product.title,
                quantity,
                price: product.price,
                total,
            })
            .await?;

        info!(order_id = %order.id, total = %order.total, "Order created");
        Ok(order)
    }

    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist.
    pub async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders.get(id).await?.ok_or(OrderError::NotFound(id))
    }

    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the store fails.
    pub async fn find(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        Ok(self.orders.get(id).await?)
    }

    /// Orders of one user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the store fails.
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_by_user(user_id).await?)
    }

    /// All orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the store fails.
    pub async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_all(status).await?)
    }

    /// Remember the stars amount of the invoice issued for an order.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist.
    pub async fn attach_stars(&self, id: OrderId, stars: StarAmount) -> Result<(), OrderError> {
        self.orders.set_stars(id, stars).await.map_err(|e| match e {
            RepositoryError::NotFound => OrderError::NotFound(id),
            other => other.into(),
        })
    }

    /// Move an order to paid, reporting whether this call did it.
    ///
    /// The status change is a single compare-and-set in the store, so of
    /// several concurrent callers exactly one sees `Settlement::Applied`.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist and
    /// `OrderError::InvalidStatus` if it already failed.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn settle(&self, id: OrderId) -> Result<Settlement, OrderError> {
        if let Some(order) = self
            .orders
            .transition(id, OrderStatus::Pending, OrderStatus::Paid)
            .await?
        {
            info!("Order paid");
            return Ok(Settlement::Applied(order));
        }

        let current = self.get(id).await?;
        match current.status {
            OrderStatus::Paid => {
                debug!("Order already paid");
                Ok(Settlement::AlreadyPaid(current))
            }
            status => Err(OrderError::InvalidStatus(status)),
        }
    }

    /// Move an order to paid. Already paid orders are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist and
    /// `OrderError::InvalidStatus` if it already failed.
    pub async fn transition_to_paid(&self, id: OrderId) -> Result<Order, OrderError> {
        self.settle(id).await.map(Settlement::into_order)
    }

    /// Move a pending order to failed.
    ///
    /// Returns `None` when the order is missing or no longer pending.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the store fails.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn transition_to_failed(&self, id: OrderId) -> Result<Option<Order>, OrderError> {
        let order = self
            .orders
            .transition(id, OrderStatus::Pending, OrderStatus::Failed)
            .await?;
        if order.is_some() {
            info!("Order failed");
        }
        Ok(order)
    }

    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the store fails.
    pub async fn stats(&self) -> Result<OrderStats, OrderError> {
        Ok(self.orders.stats().await?)
    }
}

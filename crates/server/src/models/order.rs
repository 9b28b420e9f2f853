//! Order domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use starshop_core::{OrderId, OrderStatus, ProductId, UserId};

/// An order for one product.
///
/// Title and unit price are snapshots taken at creation; `total` is computed
/// once and never recomputed, even if the product later changes or is
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// `None` once the product has been removed from the catalog.
    pub product_id: Option<ProductId>,
    pub product_title: String,
    pub quantity: i32,
    /// Unit price at creation time.
    pub price: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    /// Stars amount of the last issued invoice.
    pub stars: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data needed to insert an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_title: String,
    pub quantity: i32,
    pub price: Decimal,
    pub total: Decimal,
}

/// Counters for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderStats {
    pub total_orders: i64,
    pub pending_orders: i64,
    pub paid_orders: i64,
    pub failed_orders: i64,
    /// Sum of `total` over paid orders.
    pub revenue: Decimal,
    /// Sum of invoiced stars over paid orders.
    pub stars_received: i64,
}

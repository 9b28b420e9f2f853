//! Order repository.
//!
//! Status changes are compare-and-set updates guarded by the current status,
//! so concurrent payment callbacks cannot both apply.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use starshop_core::{OrderId, OrderStatus, ProductId, StarAmount, UserId};

use super::{OrderStore, RepositoryError};
use crate::models::{NewOrder, Order, OrderStats};

const ORDER_COLUMNS: &str = "id, user_id, product_id, product_title, quantity, price, total, \
                             status, stars, paid_at, created_at";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    user_id: i32,
    product_id: Option<i32>,
    product_title: String,
    quantity: i32,
    price: Decimal,
    total: Decimal,
    status: OrderStatus,
    stars: Option<i64>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        if row.quantity < 1 {
            return Err(RepositoryError::DataCorruption(format!(
                "order {} has quantity {}",
                row.id, row.quantity
            )));
        }

        Ok(Self {
            id: OrderId::new(row.id),
            user_id: UserId::new(row.user_id),
            product_id: row.product_id.map(ProductId::new),
            product_title: row.product_title,
            quantity: row.quantity,
            price: row.price,
            total: row.total,
            status: row.status,
            stars: row.stars,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total_orders: i64,
    pending_orders: i64,
    paid_orders: i64,
    failed_orders: i64,
    revenue: Decimal,
    stars_received: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO orders (user_id, product_id, product_title, quantity, price, total)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(order.user_id)
        .bind(order.product_id)
        .bind(&order.product_title)
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.total)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE $1::order_status IS NULL OR status = $1
            ORDER BY created_at DESC, id DESC
            "
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_stars(&self, id: OrderId, stars: StarAmount) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE orders SET stars = $2 WHERE id = $1")
            .bind(id)
            .bind(stars.get())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE orders
            SET status = $3,
                paid_at = CASE WHEN $3 = 'paid'::order_status THEN NOW() ELSE paid_at END
            WHERE id = $1 AND status = $2
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn stats(&self) -> Result<OrderStats, RepositoryError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r"
            SELECT COUNT(*) AS total_orders,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending_orders,
                   COUNT(*) FILTER (WHERE status = 'paid') AS paid_orders,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed_orders,
                   COALESCE(SUM(total) FILTER (WHERE status = 'paid'), 0) AS revenue,
                   COALESCE(SUM(stars) FILTER (WHERE status = 'paid'), 0)::BIGINT AS stars_received
            FROM orders
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderStats {
            total_orders: row.total_orders,
            pending_orders: row.pending_orders,
            paid_orders: row.paid_orders,
            failed_orders: row.failed_orders,
            revenue: row.revenue,
            stars_received: row.stars_received,
        })
    }
}

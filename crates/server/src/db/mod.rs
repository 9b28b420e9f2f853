//! Storage for users, catalog, orders and order chat.
//!
//! # Tables
//!
//! - `users` - Telegram users (unique `telegram_id`)
//! - `categories`, `products` - Read-only catalog
//! - `orders` - Orders with title/price snapshots; `product_id` is nulled when
//!   a product is deleted so order history survives
//! - `messages` - Order chat log (cascade-deleted with the order)
//! - `tower_sessions.session` - Session storage
//!
//! Every entity has its own repository trait so services can run against
//! `PostgreSQL` in production and [`MemoryStore`] in tests.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p starshop-cli -- migrate
//! ```

pub mod catalog;
pub mod memory;
pub mod messages;
pub mod orders;
pub mod users;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use starshop_core::{
    CategoryId, MessageId, OrderId, OrderStatus, ProductId, SenderRole, StarAmount, TelegramId,
    UserId,
};

use crate::models::{
    Category, Message, NewMessage, NewOrder, NewUser, Order, OrderStats, Product, ThreadSummary,
    User, UserProfile,
};

pub use catalog::CatalogRepository;
pub use memory::MemoryStore;
pub use messages::MessageRepository;
pub use orders::OrderRepository;
pub use users::UserRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate Telegram id).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map unique violations to [`RepositoryError::Conflict`].
pub(crate) fn map_unique_violation(err: sqlx::Error, what: &str) -> RepositoryError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            RepositoryError::Conflict(format!("{what} already exists"))
        }
        other => RepositoryError::Database(other),
    }
}

/// Schema migrations embedded from `crates/server/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

// =============================================================================
// Repository Traits
// =============================================================================

/// Users keyed by Telegram id.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_by_telegram_id(
        &self,
        telegram_id: TelegramId,
    ) -> Result<Option<User>, RepositoryError>;

    /// Insert a user.
    ///
    /// Returns [`RepositoryError::Conflict`] if the Telegram id is taken.
    async fn insert(&self, user: &NewUser) -> Result<User, RepositoryError>;

    /// Refresh mutable profile fields and the cached admin flag.
    ///
    /// Never touches `id`, `telegram_id` or `created_at`.
    async fn update_profile(
        &self,
        id: UserId,
        profile: &UserProfile,
        is_admin: bool,
    ) -> Result<User, RepositoryError>;

    /// Bump `total_orders` by one and `total_spent` by `amount`.
    async fn record_purchase(&self, id: UserId, amount: Decimal) -> Result<(), RepositoryError>;

    async fn list_by_telegram_ids(
        &self,
        telegram_ids: &[TelegramId],
    ) -> Result<Vec<User>, RepositoryError>;

    async fn count(&self) -> Result<i64, RepositoryError>;
}

/// Read-only product catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError>;

    async fn list_products(
        &self,
        category: Option<CategoryId>,
    ) -> Result<Vec<Product>, RepositoryError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;
}

/// Orders and their status transitions.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &NewOrder) -> Result<Order, RepositoryError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Orders of one user, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError>;

    /// All orders, newest first, optionally filtered by status.
    async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepositoryError>;

    async fn set_stars(&self, id: OrderId, stars: StarAmount) -> Result<(), RepositoryError>;

    /// Atomically move an order from `from` to `to`.
    ///
    /// Returns the updated order when this call performed the transition,
    /// `None` when the order is missing or not in `from`.
    async fn transition(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError>;

    async fn stats(&self) -> Result<OrderStats, RepositoryError>;
}

/// Append-mostly chat log per order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &NewMessage) -> Result<Message, RepositoryError>;

    async fn get(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// Messages of an order strictly newer than `since`, oldest first.
    async fn list(
        &self,
        order_id: OrderId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Attach a reply; also marks the message read.
    async fn set_reply(
        &self,
        id: MessageId,
        reply: &str,
        replied_at: DateTime<Utc>,
    ) -> Result<Option<Message>, RepositoryError>;

    /// Mark every message of `order_id` written by `author` as read.
    async fn mark_read(&self, order_id: OrderId, author: SenderRole)
    -> Result<u64, RepositoryError>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: MessageId) -> Result<bool, RepositoryError>;

    /// Delete every message of an order; returns how many went.
    async fn delete_by_order(&self, order_id: OrderId) -> Result<u64, RepositoryError>;

    /// Latest message per order, newest thread first.
    ///
    /// `owner` restricts to one customer's orders; `unread_from` selects whose
    /// unread messages are counted.
    async fn threads(
        &self,
        owner: Option<UserId>,
        unread_from: SenderRole,
    ) -> Result<Vec<ThreadSummary>, RepositoryError>;

    /// Unread messages written by `author` across all orders.
    async fn count_unread(&self, author: SenderRole) -> Result<i64, RepositoryError>;
}

//! In-memory implementation of every repository trait.
//!
//! Mirrors the `PostgreSQL` constraints that services rely on: unique
//! Telegram ids, compare-and-set status transitions, cascade deletes of
//! messages and `SET NULL` on product removal. Used for tests and local
//! development without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use starshop_core::{
    CategoryId, MessageId, OrderId, OrderStatus, ProductId, SenderRole, StarAmount, TelegramId,
    UserId,
};

use super::{CatalogStore, MessageStore, OrderStore, RepositoryError, UserStore};
use crate::models::{
    Category, Message, NewMessage, NewOrder, NewUser, Order, OrderStats, Product, ThreadSummary,
    User, UserProfile,
};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    categories: BTreeMap<CategoryId, Category>,
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    messages: BTreeMap<MessageId, Message>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store holding all tables behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

/// Timestamps are kept at database (microsecond) precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog category.
    pub async fn add_category(&self, name: &str) -> Category {
        let mut tables = self.tables.write().await;
        let category = Category {
            id: CategoryId::new(tables.next_id()),
            name: name.to_string(),
        };
        tables.categories.insert(category.id, category.clone());
        category
    }

    /// Add a product to the catalog.
    pub async fn add_product(&self, category_id: CategoryId, title: &str, price: Decimal) -> Product {
        let mut tables = self.tables.write().await;
        let product = Product {
            id: ProductId::new(tables.next_id()),
            category_id,
            title: title.to_string(),
            price,
            description: None,
            image_url: None,
        };
        tables.products.insert(product.id, product.clone());
        product
    }

    /// Change a product's price.
    pub async fn set_product_price(&self, id: ProductId, price: Decimal) {
        if let Some(product) = self.tables.write().await.products.get_mut(&id) {
            product.price = price;
        }
    }

    /// Remove a product; orders keep their snapshot and lose the reference.
    pub async fn remove_product(&self, id: ProductId) {
        let mut tables = self.tables.write().await;
        tables.products.remove(&id);
        for order in tables.orders.values_mut() {
            if order.product_id == Some(id) {
                order.product_id = None;
            }
        }
    }

    /// Remove an order together with its messages.
    pub async fn remove_order(&self, id: OrderId) {
        let mut tables = self.tables.write().await;
        tables.orders.remove(&id);
        tables.messages.retain(|_, message| message.order_id != id);
    }

    /// Number of stored users with the given Telegram id.
    pub async fn count_telegram_id(&self, telegram_id: TelegramId) -> usize {
        self.tables
            .read()
            .await
            .users
            .values()
            .filter(|user| user.telegram_id == telegram_id)
            .count()
    }
}

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_telegram_id(
        &self,
        telegram_id: TelegramId,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|user| user.telegram_id == telegram_id)
            .cloned())
    }

    async fn insert(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|user| user.telegram_id == new_user.telegram_id)
        {
            return Err(RepositoryError::Conflict(
                "telegram user already exists".to_string(),
            ));
        }

        let created_at = now();
        let user = User {
            id: UserId::new(tables.next_id()),
            telegram_id: new_user.telegram_id,
            username: new_user.profile.username.clone(),
            first_name: new_user.profile.first_name.clone(),
            last_name: new_user.profile.last_name.clone(),
            is_admin: new_user.is_admin,
            stars: 0,
            total_orders: 0,
            total_spent: Decimal::ZERO,
            created_at,
            updated_at: created_at,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_profile(
        &self,
        id: UserId,
        profile: &UserProfile,
        is_admin: bool,
    ) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if profile.username.is_some() {
            user.username.clone_from(&profile.username);
        }
        if profile.first_name.is_some() {
            user.first_name.clone_from(&profile.first_name);
        }
        if profile.last_name.is_some() {
            user.last_name.clone_from(&profile.last_name);
        }
        user.is_admin = is_admin;
        user.updated_at = now();
        Ok(user.clone())
    }

    async fn record_purchase(&self, id: UserId, amount: Decimal) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.total_orders += 1;
        user.total_spent += amount;
        user.updated_at = now();
        Ok(())
    }

    async fn list_by_telegram_ids(
        &self,
        telegram_ids: &[TelegramId],
    ) -> Result<Vec<User>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|user| telegram_ids.contains(&user.telegram_id))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count = self.tables.read().await.users.len();
        i64::try_from(count).map_err(|e| RepositoryError::DataCorruption(e.to_string()))
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        let mut categories: Vec<Category> =
            self.tables.read().await.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn list_products(
        &self,
        category: Option<CategoryId>,
    ) -> Result<Vec<Product>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .products
            .values()
            .filter(|product| category.is_none_or(|id| product.category_id == id))
            .cloned()
            .collect())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }
}

// =============================================================================
// Orders
// =============================================================================

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, new_order: &NewOrder) -> Result<Order, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&new_order.user_id) {
            return Err(RepositoryError::Conflict(format!(
                "user {} does not exist",
                new_order.user_id
            )));
        }

        let order = Order {
            id: OrderId::new(tables.next_id()),
            user_id: new_order.user_id,
            product_id: Some(new_order.product_id),
            product_title: new_order.product_title.clone(),
            quantity: new_order.quantity,
            price: new_order.price,
            total: new_order.total,
            status: OrderStatus::Pending,
            stars: None,
            paid_at: None,
            created_at: now(),
        };
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|order| status.is_none_or(|s| order.status == s))
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn set_stars(&self, id: OrderId, stars: StarAmount) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let order = tables.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        order.stars = Some(stars.get());
        Ok(())
    }

    async fn transition(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(None);
        };
        if order.status != from {
            return Ok(None);
        }

        order.status = to;
        if to == OrderStatus::Paid {
            order.paid_at = Some(now());
        }
        Ok(Some(order.clone()))
    }

    async fn stats(&self) -> Result<OrderStats, RepositoryError> {
        let tables = self.tables.read().await;
        let mut stats = OrderStats::default();
        for order in tables.orders.values() {
            stats.total_orders += 1;
            match order.status {
                OrderStatus::Pending => stats.pending_orders += 1,
                OrderStatus::Failed => stats.failed_orders += 1,
                OrderStatus::Paid => {
                    stats.paid_orders += 1;
                    stats.revenue += order.total;
                    stats.stars_received += order.stars.unwrap_or_default();
                }
            }
        }
        Ok(stats)
    }
}

// =============================================================================
// Messages
// =============================================================================

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, new_message: &NewMessage) -> Result<Message, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&new_message.order_id) {
            return Err(RepositoryError::Conflict(format!(
                "order {} does not exist",
                new_message.order_id
            )));
        }

        let message = Message {
            id: MessageId::new(tables.next_id()),
            order_id: new_message.order_id,
            user_id: new_message.user_id,
            sender_role: new_message.sender_role,
            content: new_message.content.clone(),
            reply: None,
            replied_at: None,
            is_read: false,
            created_at: now(),
        };
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn list(
        &self,
        order_id: OrderId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut messages: Vec<Message> = self
            .tables
            .read()
            .await
            .messages
            .values()
            .filter(|m| m.order_id == order_id && since.is_none_or(|s| m.created_at > s))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn set_reply(
        &self,
        id: MessageId,
        reply: &str,
        replied_at: DateTime<Utc>,
    ) -> Result<Option<Message>, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables.messages.get_mut(&id).map(|message| {
            message.reply = Some(reply.to_string());
            message.replied_at = Some(replied_at);
            message.is_read = true;
            message.clone()
        }))
    }

    async fn mark_read(
        &self,
        order_id: OrderId,
        author: SenderRole,
    ) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for message in tables.messages.values_mut() {
            if message.order_id == order_id && message.sender_role == author && !message.is_read {
                message.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: MessageId) -> Result<bool, RepositoryError> {
        Ok(self.tables.write().await.messages.remove(&id).is_some())
    }

    async fn delete_by_order(&self, order_id: OrderId) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut deleted = 0;
        tables.messages.retain(|_, message| {
            let keep = message.order_id != order_id;
            if !keep {
                deleted += 1;
            }
            keep
        });
        Ok(deleted)
    }

    async fn threads(
        &self,
        owner: Option<UserId>,
        unread_from: SenderRole,
    ) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut latest: BTreeMap<OrderId, (&Message, i64)> = BTreeMap::new();

        for message in tables.messages.values() {
            let entry = latest.entry(message.order_id).or_insert((message, 0));
            if (message.created_at, message.id) > (entry.0.created_at, entry.0.id) {
                entry.0 = message;
            }
            if message.sender_role == unread_from && !message.is_read {
                entry.1 += 1;
            }
        }

        let mut threads: Vec<ThreadSummary> = latest
            .into_iter()
            .filter_map(|(order_id, (message, unread))| {
                let order = tables.orders.get(&order_id)?;
                if owner.is_some_and(|owner| order.user_id != owner) {
                    return None;
                }
                Some(ThreadSummary {
                    order_id,
                    product_title: order.product_title.clone(),
                    customer_id: order.user_id,
                    last_message: message.clone(),
                    unread,
                })
            })
            .collect();
        threads.sort_by(|a, b| {
            (b.last_message.created_at, b.last_message.id)
                .cmp(&(a.last_message.created_at, a.last_message.id))
        });
        Ok(threads)
    }

    async fn count_unread(&self, author: SenderRole) -> Result<i64, RepositoryError> {
        let count = self
            .tables
            .read()
            .await
            .messages
            .values()
            .filter(|m| m.sender_role == author && !m.is_read)
            .count();
        i64::try_from(count).map_err(|e| RepositoryError::DataCorruption(e.to_string()))
    }
}

//! Order chat domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use starshop_core::{MessageId, OrderId, SenderRole, UserId};

/// One entry in an order's chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub order_id: OrderId,
    /// Sender; the customer or an operator.
    pub user_id: UserId,
    pub sender_role: SenderRole,
    pub content: String,
    /// Operator reply attached to this message.
    pub reply: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Data needed to append a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub sender_role: SenderRole,
    pub content: String,
}

/// Latest activity of one order thread, for inbox views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSummary {
    pub order_id: OrderId,
    pub product_title: String,
    /// Owner of the order.
    pub customer_id: UserId,
    pub last_message: Message,
    /// Unread messages written by the other side.
    pub unread: i64,
}

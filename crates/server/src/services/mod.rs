//! Business logic services.
//!
//! # Services
//!
//! - `users` - Get-or-create user directory with allow-list admin flags
//! - `catalog` - Cached read-only product catalog
//! - `orders` - Order ledger with price snapshots and atomic transitions
//! - `payments` - Telegram Stars invoices and payment callbacks
//! - `chat` - Per-order chat with long-poll delivery
//! - `notify` - Best-effort notification sinks
//! - `bot` - Bot webhook updates
//!
//! Services hold their stores as trait objects and are cheap to clone.

pub mod bot;
pub mod catalog;
pub mod chat;
pub mod notify;
pub mod orders;
pub mod payments;
pub mod users;

use thiserror::Error;

use crate::models::{Order, User};

pub use bot::BotUpdates;
pub use catalog::Catalog;
pub use chat::{ChatError, ChatThread, ThreadScope};
pub use notify::{
    BroadcastSink, ChatEvent, FanoutSink, NotificationSink, Notifier, NotifyError,
    TelegramNotifier,
};
pub use orders::{OrderError, OrderLedger, Settlement};
pub use payments::{Invoice, PaymentError, PaymentGateway, PaymentOutcome};
pub use users::UserDirectory;

/// The caller is authenticated but may not touch the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("not the owner of this order")]
    NotOwner,

    #[error("admin access required")]
    NotAdmin,
}

/// Owners and operators may read and write an order's resources.
///
/// # Errors
///
/// Returns `AuthorizationError::NotOwner` for anyone else.
pub fn ensure_order_access(user: &User, order: &Order) -> Result<(), AuthorizationError> {
    if user.is_admin || order.user_id == user.id {
        Ok(())
    } else {
        Err(AuthorizationError::NotOwner)
    }
}

/// Only the order's owner passes; operators are refused too.
///
/// # Errors
///
/// Returns `AuthorizationError::NotOwner` when `user` does not own `order`.
pub fn ensure_owner(user: &User, order: &Order) -> Result<(), AuthorizationError> {
    if order.user_id == user.id {
        Ok(())
    } else {
        Err(AuthorizationError::NotOwner)
    }
}

/// # Errors
///
/// Returns `AuthorizationError::NotAdmin` unless `user` is an operator.
pub const fn ensure_admin(user: &User) -> Result<(), AuthorizationError> {
    if user.is_admin {
        Ok(())
    } else {
        Err(AuthorizationError::NotAdmin)
    }
}

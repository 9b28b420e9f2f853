//! Chat and payment notifications.
//!
//! Notifications are best-effort side channels: they run in detached tasks
//! and a failing sink is logged, never surfaced to the request that caused
//! the event.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use starshop_core::{MessageId, OrderId, SenderRole};

use crate::db::RepositoryError;
use crate::models::{Message, Order};
use crate::services::{OrderError, OrderLedger, UserDirectory};
use crate::telegram::{BotMessenger, InlineKeyboardButton, InlineKeyboardMarkup, TelegramError};

/// Longest message excerpt included in a Telegram notification.
const PREVIEW_CHARS: usize = 200;

/// Something happened in an order thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    NewMessage {
        message: Message,
    },
    /// Operator greeting posted when an order is paid.
    Welcome {
        message: Message,
    },
    Reply {
        message: Message,
    },
    MessageDeleted {
        order_id: OrderId,
        message_id: MessageId,
        sender_role: SenderRole,
    },
    ThreadCleared {
        order_id: OrderId,
        deleted: u64,
    },
    OrderPaid {
        order: Order,
    },
}

impl ChatEvent {
    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::NewMessage { message } | Self::Welcome { message } | Self::Reply { message } => {
                message.order_id
            }
            Self::MessageDeleted { order_id, .. } | Self::ThreadCleared { order_id, .. } => {
                *order_id
            }
            Self::OrderPaid { order } => order.id,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::Welcome { .. } => "welcome",
            Self::Reply { .. } => "reply",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ThreadCleared { .. } => "thread_cleared",
            Self::OrderPaid { .. } => "order_paid",
        }
    }
}

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram: {0}")]
    Telegram(#[from] TelegramError),

    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),
}

/// Destination for chat events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn push(&self, event: &ChatEvent) -> Result<(), NotifyError>;
}

// =============================================================================
// Notifier
// =============================================================================

/// Fire-and-forget front for a [`NotificationSink`].
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Deliver `event` in a detached task. Failures are logged.
    pub fn notify(&self, event: ChatEvent) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.push(&event).await {
                warn!(
                    order_id = %event.order_id(),
                    event = event.kind(),
                    error = %e,
                    "Notification failed"
                );
            }
        });
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// In-process pub/sub of chat events.
///
/// Slow subscribers lag and lose events; with no subscribers events are
/// dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ChatEvent>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn push(&self, event: &ChatEvent) -> Result<(), NotifyError> {
        if self.sender.send(event.clone()).is_err() {
            debug!("No chat event subscribers");
        }
        Ok(())
    }
}

/// Pushes every event to several sinks.
///
/// All sinks are tried; the first error is reported.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn push(&self, event: &ChatEvent) -> Result<(), NotifyError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.push(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Direct messages through the bot.
///
/// Customer messages go to every operator; operator messages, replies and
/// payment confirmations go to the order's customer. The welcome greeting
/// is left to the payment confirmation. Private chat ids equal Telegram
/// user ids.
#[derive(Clone)]
pub struct TelegramNotifier {
    messenger: Arc<dyn BotMessenger>,
    ledger: OrderLedger,
    users: UserDirectory,
    frontend_url: String,
}

impl TelegramNotifier {
    #[must_use]
    pub fn new(
        messenger: Arc<dyn BotMessenger>,
        ledger: OrderLedger,
        users: UserDirectory,
        frontend_url: &str,
    ) -> Self {
        Self {
            messenger,
            ledger,
            users,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    fn thread_button(&self, order_id: OrderId) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::single(InlineKeyboardButton::web_app(
            "Open chat",
            format!("{}/messages/{order_id}", self.frontend_url),
        ))
    }

    async fn send_to_customer(&self, order_id: OrderId, text: &str) -> Result<(), NotifyError> {
        let order = self
            .ledger
            .find(order_id)
            .await?
            .ok_or(NotifyError::OrderNotFound(order_id))?;
        let customer = self
            .users
            .get(order.user_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        self.messenger
            .send_message(
                customer.telegram_id.get(),
                text,
                Some(self.thread_button(order_id)),
            )
            .await?;
        Ok(())
    }

    async fn send_to_admins(&self, order_id: OrderId, text: &str) -> Result<(), NotifyError> {
        let mut first_error = None;
        for admin in self.users.admin_telegram_ids() {
            if let Err(e) = self
                .messenger
                .send_message(admin.get(), text, Some(self.thread_button(order_id)))
                .await
            {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn push(&self, event: &ChatEvent) -> Result<(), NotifyError> {
        match event {
            ChatEvent::NewMessage { message } => {
                let text = format!(
                    "Order #{}: {}",
                    message.order_id,
                    preview(&message.content)
                );
                match message.sender_role {
                    SenderRole::Customer => self.send_to_admins(message.order_id, &text).await,
                    SenderRole::Admin => self.send_to_customer(message.order_id, &text).await,
                }
            }
            ChatEvent::Reply { message } => {
                let reply = message.reply.as_deref().unwrap_or_default();
                let text = format!("Reply on order #{}: {}", message.order_id, preview(reply));
                self.send_to_customer(message.order_id, &text).await
            }
            ChatEvent::OrderPaid { order } => {
                let text = format!("Order #{} paid. Thank you!", order.id);
                self.send_to_customer(order.id, &text).await
            }
            ChatEvent::Welcome { .. }
            | ChatEvent::MessageDeleted { .. }
            | ChatEvent::ThreadCleared { .. } => Ok(()),
        }
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

//! Per-order chat between a customer and the operators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use starshop_core::{MessageId, OrderId, SenderRole, UserId};

use crate::config::LongPollConfig;
use crate::db::{MessageStore, RepositoryError};
use crate::models::{Message, NewMessage, Order, ThreadSummary, User};
use crate::services::notify::{ChatEvent, Notifier};

/// Longest accepted message or reply, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Errors from chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message is longer than {MAX_MESSAGE_CHARS} characters")]
    TooLong,

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Whose inbox a thread listing is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadScope {
    /// One customer's orders; unread counts operator messages.
    Customer(UserId),
    /// Every order; unread counts customer messages.
    Admin,
}

/// Order chat operations.
///
/// Callers authorize access to the order before calling in; every write
/// emits a best-effort notification.
#[derive(Clone)]
pub struct ChatThread {
    messages: Arc<dyn MessageStore>,
    notifier: Notifier,
    long_poll: LongPollConfig,
    welcome: Option<String>,
}

impl ChatThread {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageStore>,
        notifier: Notifier,
        long_poll: LongPollConfig,
        welcome: Option<String>,
    ) -> Self {
        Self {
            messages,
            notifier,
            long_poll,
            welcome,
        }
    }

    #[must_use]
    pub const fn long_poll(&self) -> LongPollConfig {
        self.long_poll
    }

    /// Append a message to an order's thread.
    ///
    /// The sender role follows the sender's admin flag.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::EmptyMessage` or `ChatError::TooLong` for bad
    /// content, `ChatError::Repository` if the store fails.
    #[instrument(skip(self, order, sender, content), fields(order_id = %order.id, user_id = %sender.id))]
    pub async fn post_message(
        &self,
        order: &Order,
        sender: &User,
        content: &str,
    ) -> Result<Message, ChatError> {
        let content = validate(content)?;
        let message = self
            .messages
            .insert(&NewMessage {
                order_id: order.id,
                user_id: sender.id,
                sender_role: SenderRole::from_admin_flag(sender.is_admin),
                content: content.to_string(),
            })
            .await?;

        debug!(message_id = %message.id, role = %message.sender_role, "Message posted");
        self.notifier.notify(ChatEvent::NewMessage {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Post the configured welcome text on behalf of an operator.
    ///
    /// Returns `None` when no welcome text is configured.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    pub async fn post_welcome(
        &self,
        order: &Order,
        admin: &User,
    ) -> Result<Option<Message>, ChatError> {
        let Some(welcome) = self.welcome.as_deref() else {
            return Ok(None);
        };
        let message = self
            .messages
            .insert(&NewMessage {
                order_id: order.id,
                user_id: admin.id,
                sender_role: SenderRole::Admin,
                content: welcome.to_string(),
            })
            .await?;

        info!(order_id = %order.id, "Welcome message posted");
        self.notifier.notify(ChatEvent::Welcome {
            message: message.clone(),
        });
        Ok(Some(message))
    }

    /// Messages of an order strictly newer than `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    pub async fn list_messages(
        &self,
        order_id: OrderId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ChatError> {
        Ok(self.messages.list(order_id, since).await?)
    }

    /// Wait for messages newer than `after`.
    ///
    /// Checks the store every `interval` until something arrives, `max_wait`
    /// elapses or `cancel` fires; the last two yield an empty list. Dropping
    /// the future stops the loop.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    #[instrument(skip(self, cancel), fields(order_id = %order_id))]
    pub async fn poll_messages(
        &self,
        order_id: OrderId,
        after: Option<DateTime<Utc>>,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, ChatError> {
        let deadline = Instant::now() + max_wait;

        loop {
            let messages = self.messages.list(order_id, after).await?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            let pause = self.long_poll.interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Long poll cancelled");
                    return Ok(Vec::new());
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Attach an operator reply to a message.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if the message does not exist.
    #[instrument(skip(self, reply), fields(message_id = %message_id))]
    pub async fn reply(&self, message_id: MessageId, reply: &str) -> Result<Message, ChatError> {
        let reply = validate(reply)?;
        let message = self
            .messages
            .set_reply(message_id, reply, Utc::now())
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))?;

        self.notifier.notify(ChatEvent::Reply {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Mark the other side's messages in an order as read by `reader`.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    pub async fn mark_read(&self, order_id: OrderId, reader: SenderRole) -> Result<u64, ChatError> {
        Ok(self
            .messages
            .mark_read(order_id, reader.counterpart())
            .await?)
    }

    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if the message does not exist.
    pub async fn get(&self, message_id: MessageId) -> Result<Message, ChatError> {
        self.messages
            .get(message_id)
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))
    }

    /// # Errors
    ///
    /// Returns `ChatError::MessageNotFound` if the message is already gone.
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub async fn delete(&self, message: &Message) -> Result<(), ChatError> {
        if !self.messages.delete(message.id).await? {
            return Err(ChatError::MessageNotFound(message.id));
        }

        self.notifier.notify(ChatEvent::MessageDeleted {
            order_id: message.order_id,
            message_id: message.id,
            sender_role: message.sender_role,
        });
        Ok(())
    }

    /// Delete a whole order thread; returns how many messages went.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn clear(&self, order_id: OrderId) -> Result<u64, ChatError> {
        let deleted = self.messages.delete_by_order(order_id).await?;

        info!(deleted, "Thread cleared");
        self.notifier.notify(ChatEvent::ThreadCleared { order_id, deleted });
        Ok(deleted)
    }

    /// Latest message per order, newest thread first.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    pub async fn threads(&self, scope: ThreadScope) -> Result<Vec<ThreadSummary>, ChatError> {
        let threads = match scope {
            ThreadScope::Customer(user_id) => {
                self.messages.threads(Some(user_id), SenderRole::Admin).await?
            }
            ThreadScope::Admin => self.messages.threads(None, SenderRole::Customer).await?,
        };
        Ok(threads)
    }

    /// Customer messages no operator has read yet.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Repository` if the store fails.
    pub async fn unread_for_admins(&self) -> Result<i64, ChatError> {
        Ok(self.messages.count_unread(SenderRole::Customer).await?)
    }
}

fn validate(content: &str) -> Result<&str, ChatError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::TooLong);
    }
    Ok(content)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use starshop_core::TelegramId;

    use super::*;
    use crate::config::AdminAllowList;
    use crate::db::MemoryStore;
    use crate::models::UserProfile;
    use crate::services::notify::BroadcastSink;
    use crate::services::{OrderLedger, UserDirectory};

    const ADMIN: TelegramId = TelegramId::new(1000);
    const CUSTOMER: TelegramId = TelegramId::new(123_456_789);

    struct Fixture {
        store: Arc<MemoryStore>,
        chat: ChatThread,
        events: BroadcastSink,
        order: Order,
        customer: User,
        admin: User,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let users = UserDirectory::new(store.clone(), AdminAllowList::new([ADMIN]));
        let customer = users
            .get_or_create(CUSTOMER, &UserProfile::default())
            .await
            .unwrap();
        let admin = users
            .get_or_create(ADMIN, &UserProfile::default())
            .await
            .unwrap();
        let category = store.add_category("Tarot").await;
        let product = store.add_product(category.id, "Spread", Decimal::ONE).await;
        let order = OrderLedger::new(store.clone(), store.clone())
            .create(customer.id, product.id, 1)
            .await
            .unwrap();

        let events = BroadcastSink::default();
        let chat = ChatThread::new(
            store.clone(),
            Notifier::new(Arc::new(events.clone())),
            LongPollConfig::default(),
            Some("Thanks for your order!".to_string()),
        );
        Fixture {
            store,
            chat,
            events,
            order,
            customer,
            admin,
        }
    }

    #[tokio::test]
    async fn test_post_message_sets_role_and_notifies() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();

        let message = f
            .chat
            .post_message(&f.order, &f.customer, "  hello  ")
            .await
            .unwrap();
        assert_eq!(message.sender_role, SenderRole::Customer);
        assert_eq!(message.content, "hello");
        assert!(!message.is_read);

        let reply = f.chat.post_message(&f.order, &f.admin, "hi").await.unwrap();
        assert_eq!(reply.sender_role, SenderRole::Admin);

        assert_eq!(rx.recv().await.unwrap(), ChatEvent::NewMessage { message });
    }

    #[tokio::test]
    async fn test_post_message_rejects_bad_content() {
        let f = fixture().await;
        assert!(matches!(
            f.chat.post_message(&f.order, &f.customer, " \n\t").await,
            Err(ChatError::EmptyMessage)
        ));
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            f.chat.post_message(&f.order, &f.customer, &long).await,
            Err(ChatError::TooLong)
        ));
    }

    #[tokio::test]
    async fn test_list_messages_since_is_exclusive() {
        let f = fixture().await;
        let first = f.chat.post_message(&f.order, &f.customer, "one").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = f.chat.post_message(&f.order, &f.admin, "two").await.unwrap();

        let all = f.chat.list_messages(f.order.id, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);

        let newer = f
            .chat
            .list_messages(f.order.id, Some(first.created_at))
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, second.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_empty_after_max_wait() {
        let f = fixture().await;
        let started = Instant::now();

        let messages = f
            .chat
            .poll_messages(
                f.order.id,
                None,
                Duration::from_secs(25),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let waited = started.elapsed();
        assert!(messages.is_empty());
        assert!(waited >= Duration::from_secs(25));
        assert!(waited < Duration::from_secs(27));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wakes_when_message_arrives() {
        let f = fixture().await;
        let chat = f.chat.clone();
        let order_id = f.order.id;
        let started = Instant::now();

        let poll = tokio::spawn(async move {
            chat.poll_messages(
                order_id,
                None,
                Duration::from_secs(25),
                &CancellationToken::new(),
            )
            .await
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        f.chat
            .post_message(&f.order, &f.admin, "your reading is ready")
            .await
            .unwrap();

        let messages = poll.await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_cancel() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();

        let messages = f
            .chat
            .poll_messages(f.order.id, None, Duration::from_secs(25), &cancel)
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_reply_marks_read() {
        let f = fixture().await;
        let question = f
            .chat
            .post_message(&f.order, &f.customer, "when?")
            .await
            .unwrap();

        let answered = f.chat.reply(question.id, "tomorrow").await.unwrap();
        assert_eq!(answered.reply.as_deref(), Some("tomorrow"));
        assert!(answered.replied_at.is_some());
        assert!(answered.is_read);

        assert!(matches!(
            f.chat.reply(MessageId::new(9999), "x").await,
            Err(ChatError::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_touches_counterpart_only() {
        let f = fixture().await;
        f.chat.post_message(&f.order, &f.customer, "q").await.unwrap();
        f.chat.post_message(&f.order, &f.admin, "a").await.unwrap();

        assert_eq!(f.chat.unread_for_admins().await.unwrap(), 1);
        assert_eq!(f.chat.mark_read(f.order.id, SenderRole::Admin).await.unwrap(), 1);
        assert_eq!(f.chat.unread_for_admins().await.unwrap(), 0);

        let messages = f.chat.list_messages(f.order.id, None).await.unwrap();
        let admin_message = messages
            .iter()
            .find(|m| m.sender_role == SenderRole::Admin)
            .unwrap();
        assert!(!admin_message.is_read);
    }

    #[tokio::test]
    async fn test_delete_and_threads() {
        let f = fixture().await;
        let message = f
            .chat
            .post_message(&f.order, &f.customer, "oops")
            .await
            .unwrap();

        let threads = f.chat.threads(ThreadScope::Admin).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].unread, 1);
        assert_eq!(
            f.chat
                .threads(ThreadScope::Customer(f.customer.id))
                .await
                .unwrap()[0]
                .unread,
            0
        );

        f.chat.delete(&message).await.unwrap();
        assert!(matches!(
            f.chat.delete(&message).await,
            Err(ChatError::MessageNotFound(_))
        ));
        assert!(f.chat.threads(ThreadScope::Admin).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_empties_thread_and_notifies() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        f.chat.post_message(&f.order, &f.customer, "one").await.unwrap();
        f.chat.post_message(&f.order, &f.admin, "two").await.unwrap();

        assert_eq!(f.chat.clear(f.order.id).await.unwrap(), 2);
        assert!(f.chat.list_messages(f.order.id, None).await.unwrap().is_empty());
        assert!(f.chat.threads(ThreadScope::Admin).await.unwrap().is_empty());
        assert_eq!(f.chat.clear(f.order.id).await.unwrap(), 0);

        let mut cleared = None;
        for _ in 0..3 {
            if let ChatEvent::ThreadCleared { deleted, .. } = rx.recv().await.unwrap() {
                cleared = Some(deleted);
                break;
            }
        }
        assert_eq!(cleared, Some(2));
    }

    #[tokio::test]
    async fn test_post_welcome() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        let welcome = f.chat.post_welcome(&f.order, &f.admin).await.unwrap().unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ChatEvent::Welcome {
                message: welcome.clone()
            }
        );
        assert_eq!(welcome.sender_role, SenderRole::Admin);
        assert_eq!(welcome.user_id, f.admin.id);

        let silent = ChatThread::new(
            f.store.clone(),
            Notifier::new(Arc::new(BroadcastSink::default())),
            LongPollConfig::default(),
            None,
        );
        assert!(silent.post_welcome(&f.order, &f.admin).await.unwrap().is_none());
    }
}

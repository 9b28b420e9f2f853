//! Telegram Stars payments.
//!
//! Invoices are issued through an [`InvoiceProvider`]; Telegram then calls
//! back through the webhook with a pre-checkout query and, once charged, a
//! `successful_payment` message. Callbacks never fail outward: every problem
//! is logged and acknowledged.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use starshop_core::{OrderId, OrderStatus, ProductId, STARS_CURRENCY, StarAmount, StarRate};

use crate::models::{Order, User};
use crate::services::chat::ChatThread;
use crate::services::notify::{ChatEvent, Notifier};
use crate::services::{
    AuthorizationError, Catalog, OrderError, OrderLedger, Settlement, UserDirectory, ensure_owner,
};
use crate::telegram::{
    CreateInvoiceLink, InvoicePayload, InvoiceProvider, LabeledPrice, PreCheckoutQuery,
    TelegramError,
};

/// Bot API limit on invoice titles, in characters.
const MAX_TITLE_CHARS: usize = 32;
/// Bot API limit on invoice descriptions, in characters.
const MAX_DESCRIPTION_CHARS: usize = 255;

/// Errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The invoice provider could not be reached or refused the request.
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(#[source] TelegramError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

/// A payable invoice for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    pub order_id: OrderId,
    /// Link the Mini App opens with `openInvoice`.
    pub invoice: String,
    pub stars: StarAmount,
}

/// What a `successful_payment` callback did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The order moved to paid and side effects ran.
    Applied(Order),
    /// Duplicate delivery for an order that is already paid.
    AlreadyPaid(OrderId),
    /// Nothing to do; the reason was logged.
    Ignored(&'static str),
}

/// Issues Stars invoices and settles payment callbacks.
#[derive(Clone)]
pub struct PaymentGateway {
    ledger: OrderLedger,
    catalog: Catalog,
    users: UserDirectory,
    chat: ChatThread,
    provider: Arc<dyn InvoiceProvider>,
    notifier: Notifier,
    star_rate: StarRate,
}

impl PaymentGateway {
    #[must_use]
    pub fn new(
        ledger: OrderLedger,
        catalog: Catalog,
        users: UserDirectory,
        chat: ChatThread,
        provider: Arc<dyn InvoiceProvider>,
        notifier: Notifier,
        star_rate: StarRate,
    ) -> Self {
        Self {
            ledger,
            catalog,
            users,
            chat,
            provider,
            notifier,
            star_rate,
        }
    }

    #[must_use]
    pub const fn star_rate(&self) -> StarRate {
        self.star_rate
    }

    /// Create a pending order and an invoice link for it.
    ///
    /// If the provider fails the order stays pending and can be retried with
    /// [`Self::retry_invoice`].
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Order` for unknown products or bad quantities and
    /// `PaymentError::ProviderUnavailable` if no link could be issued.
    #[instrument(skip(self, user), fields(user_id = %user.id, product_id = %product_id))]
    pub async fn init_payment(
        &self,
        user: &User,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Invoice, PaymentError> {
        let order = self.ledger.create(user.id, product_id, quantity).await?;
        self.issue_invoice(&order).await
    }

    /// Issue a fresh link for an existing pending order of `user`.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Authorization` for someone else's order,
    /// `PaymentError::Order` if it is missing or no longer pending and
    /// `PaymentError::ProviderUnavailable` if no link could be issued.
    #[instrument(skip(self, user), fields(user_id = %user.id, order_id = %order_id))]
    pub async fn retry_invoice(&self, user: &User, order_id: OrderId) -> Result<Invoice, PaymentError> {
        let order = self.ledger.get(order_id).await?;
        ensure_owner(user, &order)?;
        if order.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStatus(order.status).into());
        }
        self.issue_invoice(&order).await
    }

    async fn issue_invoice(&self, order: &Order) -> Result<Invoice, PaymentError> {
        let stars = self.star_rate.to_stars(order.total);
        self.ledger.attach_stars(order.id, stars).await?;

        let description = match order.product_id {
            Some(product_id) => self
                .catalog
                .get_product(product_id)
                .await
                .map_err(OrderError::from)?
                .and_then(|p| p.description)
                .filter(|d| !d.trim().is_empty()),
            None => None,
        };
        let title = truncate(&order.product_title, MAX_TITLE_CHARS);
        let description = description.unwrap_or_else(|| {
            format!("Order #{}: {} x {}", order.id, order.quantity, order.product_title)
        });

        let request = CreateInvoiceLink {
            title: title.clone(),
            description: truncate(&description, MAX_DESCRIPTION_CHARS),
            payload: InvoicePayload { order_id: order.id }.encode(),
            currency: STARS_CURRENCY.to_string(),
            prices: vec![LabeledPrice {
                label: title,
                amount: stars.get(),
            }],
        };

        let invoice = self
            .provider
            .create_invoice_link(&request)
            .await
            .map_err(|e| {
                error!(order_id = %order.id, error = %e, "Invoice link request failed");
                PaymentError::ProviderUnavailable(e)
            })?;

        info!(order_id = %order.id, stars = stars.get(), "Invoice issued");
        Ok(Invoice {
            order_id: order.id,
            invoice,
            stars,
        })
    }

    /// Only Telegram Stars are accepted.
    #[must_use]
    pub fn handle_pre_checkout(currency: &str) -> bool {
        currency == STARS_CURRENCY
    }

    /// Decide on a pre-checkout query.
    ///
    /// Returns the provider-visible denial reason, or `None` to approve.
    /// A query in the wrong currency also fails its order.
    #[instrument(skip(self, query), fields(query_id = %query.id, currency = %query.currency))]
    pub async fn review_pre_checkout(&self, query: &PreCheckoutQuery) -> Option<&'static str> {
        let payload = InvoicePayload::parse(&query.invoice_payload);

        if !Self::handle_pre_checkout(&query.currency) {
            if let Some(payload) = payload {
                match self.ledger.transition_to_failed(payload.order_id).await {
                    Ok(Some(_)) => info!(order_id = %payload.order_id, "Order failed: unsupported currency"),
                    Ok(None) => {}
                    Err(e) => error!(order_id = %payload.order_id, error = %e, "Failed to mark order failed"),
                }
            }
            return Some("Only Telegram Stars are accepted");
        }

        let Some(payload) = payload else {
            warn!(payload = %query.invoice_payload, "Unparseable invoice payload");
            return Some("Unknown order");
        };

        let order = match self.ledger.find(payload.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id = %payload.order_id, "Pre-checkout for missing order");
                return Some("Unknown order");
            }
            Err(e) => {
                error!(order_id = %payload.order_id, error = %e, "Order lookup failed");
                return Some("Temporarily unavailable, please try again");
            }
        };

        if order.status != OrderStatus::Pending {
            warn!(order_id = %order.id, status = %order.status, "Pre-checkout for settled order");
            return Some("This order can no longer be paid");
        }

        let expected = order
            .stars
            .unwrap_or_else(|| self.star_rate.to_stars(order.total).get());
        if query.total_amount != expected {
            warn!(
                order_id = %order.id,
                expected,
                received = query.total_amount,
                "Pre-checkout amount mismatch"
            );
            return Some("Amount does not match the order");
        }

        None
    }

    /// Review a pre-checkout query and send the answer.
    ///
    /// Returns whether the query was approved. Delivery failures are logged.
    pub async fn answer_pre_checkout(&self, query: &PreCheckoutQuery) -> bool {
        let denial = self.review_pre_checkout(query).await;
        if let Err(e) = self
            .provider
            .answer_pre_checkout_query(&query.id, denial)
            .await
        {
            error!(query_id = %query.id, error = %e, "Failed to answer pre-checkout query");
        }
        denial.is_none()
    }

    /// Settle a `successful_payment` callback.
    ///
    /// Safe to call any number of times for the same payment: only the call
    /// that moves the order to paid records the purchase, posts the welcome
    /// message and notifies.
    #[instrument(skip(self, payload), fields(currency = %currency))]
    pub async fn handle_successful_payment(&self, payload: &str, currency: &str) -> PaymentOutcome {
        if !Self::handle_pre_checkout(currency) {
            warn!("Ignoring payment in unsupported currency");
            return PaymentOutcome::Ignored("unsupported currency");
        }

        let Some(payload) = InvoicePayload::parse(payload) else {
            warn!(payload, "Ignoring payment with unparseable payload");
            return PaymentOutcome::Ignored("invalid payload");
        };
        let order_id = payload.order_id;

        match self.ledger.settle(order_id).await {
            Ok(Settlement::Applied(order)) => {
                self.after_payment(&order).await;
                PaymentOutcome::Applied(order)
            }
            Ok(Settlement::AlreadyPaid(_)) => {
                info!(order_id = %order_id, "Duplicate payment callback");
                PaymentOutcome::AlreadyPaid(order_id)
            }
            Err(OrderError::NotFound(_)) => {
                warn!(order_id = %order_id, "Payment for missing order");
                PaymentOutcome::Ignored("order not found")
            }
            Err(OrderError::InvalidStatus(status)) => {
                warn!(order_id = %order_id, %status, "Payment for order that cannot be paid");
                PaymentOutcome::Ignored("order not payable")
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Failed to settle payment");
                PaymentOutcome::Ignored("settlement failed")
            }
        }
    }

    async fn after_payment(&self, order: &Order) {
        if let Err(e) = self.users.record_purchase(order.user_id, order.total).await {
            error!(order_id = %order.id, error = %e, "Failed to record purchase");
        }

        match self.users.admins().await {
            Ok(admins) => {
                if let Some(admin) = admins.first() {
                    if let Err(e) = self.chat.post_welcome(order, admin).await {
                        error!(order_id = %order.id, error = %e, "Failed to post welcome message");
                    }
                } else {
                    warn!(order_id = %order.id, "No registered operator to greet the customer");
                }
            }
            Err(e) => error!(order_id = %order.id, error = %e, "Failed to load operators"),
        }

        self.notifier.notify(ChatEvent::OrderPaid {
            order: order.clone(),
        });
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use starshop_core::TelegramId;

    use super::*;
    use crate::config::{AdminAllowList, LongPollConfig};
    use crate::db::MemoryStore;
    use crate::models::UserProfile;
    use crate::services::notify::BroadcastSink;
    use crate::telegram::BotUser;

    /// Invoice provider that records calls and can be switched off.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub(crate) invoices: Mutex<Vec<CreateInvoiceLink>>,
        pub(crate) answers: Mutex<Vec<(String, Option<String>)>>,
        pub(crate) down: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl InvoiceProvider for FakeProvider {
        async fn create_invoice_link(
            &self,
            invoice: &CreateInvoiceLink,
        ) -> Result<String, TelegramError> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TelegramError::Request("connection refused".to_string()));
            }
            let mut invoices = self.invoices.lock().unwrap();
            invoices.push(invoice.clone());
            Ok(format!("https://t.me/$invoice{}", invoices.len()))
        }

        async fn answer_pre_checkout_query(
            &self,
            query_id: &str,
            error_message: Option<&str>,
        ) -> Result<(), TelegramError> {
            self.answers
                .lock()
                .unwrap()
                .push((query_id.to_string(), error_message.map(str::to_string)));
            Ok(())
        }
    }

    const ADMIN: TelegramId = TelegramId::new(1000);
    const CUSTOMER: TelegramId = TelegramId::new(123_456_789);

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: PaymentGateway,
        provider: Arc<FakeProvider>,
        ledger: OrderLedger,
        users: UserDirectory,
        chat: ChatThread,
        customer: User,
        product_id: ProductId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let users = UserDirectory::new(store.clone(), AdminAllowList::new([ADMIN]));
        users
            .get_or_create(ADMIN, &UserProfile::default())
            .await
            .unwrap();
        let customer = users
            .get_or_create(CUSTOMER, &UserProfile::default())
            .await
            .unwrap();
        let category = store.add_category("Tarot").await;
        let product = store
            .add_product(category.id, "Tarot reading", Decimal::new(10000, 2))
            .await;

        let notifier = Notifier::new(Arc::new(BroadcastSink::default()));
        let ledger = OrderLedger::new(store.clone(), store.clone());
        let chat = ChatThread::new(
            store.clone(),
            notifier.clone(),
            LongPollConfig::default(),
            Some("Welcome!".to_string()),
        );
        let provider = Arc::new(FakeProvider::default());
        let gateway = PaymentGateway::new(
            ledger.clone(),
            Catalog::new(store.clone()),
            users.clone(),
            chat.clone(),
            provider.clone(),
            notifier,
            StarRate::default(),
        );

        Fixture {
            store,
            gateway,
            provider,
            ledger,
            users,
            chat,
            customer,
            product_id: product.id,
        }
    }

    fn query(order_id: OrderId, currency: &str, amount: i64) -> PreCheckoutQuery {
        PreCheckoutQuery {
            id: "q1".to_string(),
            from: BotUser {
                id: CUSTOMER,
                is_bot: false,
                first_name: None,
                last_name: None,
                username: None,
            },
            currency: currency.to_string(),
            total_amount: amount,
            invoice_payload: InvoicePayload { order_id }.encode(),
        }
    }

    #[tokio::test]
    async fn test_init_payment_issues_stars_invoice() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();

        // 100.00 / 2.015 = 49.6...
        assert_eq!(invoice.stars, StarAmount::new(50));
        let sent = f.provider.invoices.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].currency, "XTR");
        assert_eq!(sent[0].prices[0].amount, 50);
        assert_eq!(
            sent[0].payload,
            format!(r#"{{"order_id":{}}}"#, invoice.order_id)
        );
        drop(sent);

        let order = f.ledger.get(invoice.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.stars, Some(50));
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_order_pending() {
        let f = fixture().await;
        f.provider
            .down
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let result = f.gateway.init_payment(&f.customer, f.product_id, 1).await;
        assert!(matches!(result, Err(PaymentError::ProviderUnavailable(_))));

        let orders = f.ledger.list_by_user(f.customer.id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);

        f.provider
            .down
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let retried = f
            .gateway
            .retry_invoice(&f.customer, orders[0].id)
            .await
            .unwrap();
        assert_eq!(retried.order_id, orders[0].id);
        assert_eq!(f.ledger.list_by_user(f.customer.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_invoice_requires_owner() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();
        let stranger = f
            .users
            .get_or_create(TelegramId::new(555), &UserProfile::default())
            .await
            .unwrap();

        assert!(matches!(
            f.gateway.retry_invoice(&stranger, invoice.order_id).await,
            Err(PaymentError::Authorization(AuthorizationError::NotOwner))
        ));
    }

    #[test]
    fn test_handle_pre_checkout_currency() {
        assert!(PaymentGateway::handle_pre_checkout("XTR"));
        assert!(!PaymentGateway::handle_pre_checkout("USD"));
        assert!(!PaymentGateway::handle_pre_checkout("xtr"));
    }

    #[tokio::test]
    async fn test_pre_checkout_approves_pending_order() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();

        assert!(
            f.gateway
                .answer_pre_checkout(&query(invoice.order_id, "XTR", 50))
                .await
        );
        assert_eq!(
            f.provider.answers.lock().unwrap()[0],
            ("q1".to_string(), None)
        );
    }

    #[tokio::test]
    async fn test_pre_checkout_wrong_currency_fails_order() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();

        assert!(
            !f.gateway
                .answer_pre_checkout(&query(invoice.order_id, "USD", 50))
                .await
        );
        let order = f.ledger.get(invoice.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(f.provider.answers.lock().unwrap()[0].1.is_some());
    }

    #[tokio::test]
    async fn test_pre_checkout_denies_paid_missing_or_mismatched() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();

        assert!(
            f.gateway
                .review_pre_checkout(&query(invoice.order_id, "XTR", 49))
                .await
                .is_some()
        );
        assert!(
            f.gateway
                .review_pre_checkout(&query(OrderId::new(9999), "XTR", 50))
                .await
                .is_some()
        );

        f.ledger.transition_to_paid(invoice.order_id).await.unwrap();
        assert!(
            f.gateway
                .review_pre_checkout(&query(invoice.order_id, "XTR", 50))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_successful_payment_is_idempotent() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();
        let payload = InvoicePayload {
            order_id: invoice.order_id,
        }
        .encode();

        let first = f.gateway.handle_successful_payment(&payload, "XTR").await;
        let second = f.gateway.handle_successful_payment(&payload, "XTR").await;

        assert!(matches!(first, PaymentOutcome::Applied(_)));
        assert_eq!(second, PaymentOutcome::AlreadyPaid(invoice.order_id));

        let customer = f.users.get(f.customer.id).await.unwrap().unwrap();
        assert_eq!(customer.total_orders, 1);
        assert_eq!(customer.total_spent, Decimal::new(10000, 2));

        let messages = f.chat.list_messages(invoice.order_id, None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Welcome!");
    }

    #[tokio::test]
    async fn test_successful_payment_ignores_bad_input() {
        let f = fixture().await;
        let invoice = f
            .gateway
            .init_payment(&f.customer, f.product_id, 1)
            .await
            .unwrap();
        let payload = InvoicePayload {
            order_id: invoice.order_id,
        }
        .encode();

        assert!(matches!(
            f.gateway.handle_successful_payment(&payload, "USD").await,
            PaymentOutcome::Ignored(_)
        ));
        assert!(matches!(
            f.gateway.handle_successful_payment("not json", "XTR").await,
            PaymentOutcome::Ignored(_)
        ));
        assert!(matches!(
            f.gateway
                .handle_successful_payment(r#"{"order_id":9999}"#, "XTR")
                .await,
            PaymentOutcome::Ignored(_)
        ));

        let order = f.ledger.get(invoice.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(f.store.count_telegram_id(CUSTOMER).await, 1);
    }
}

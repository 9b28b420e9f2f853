//! Integration tests for Starshop.
//!
//! The full router runs in-process on a loopback port, backed by the
//! in-memory stores and a recording stand-in for the Bot API. No database
//! or network access is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p starshop-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `purchase_flow` - Invoice, pre-checkout and payment webhooks end to end
//! - `access` - Authentication and ownership checks
//! - `chat` - Order chat, long-poll and operator replies

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use starshop_core::{ProductId, TelegramId};
use starshop_server::config::{AdminAllowList, LongPollConfig, ServerConfig};
use starshop_server::db::MemoryStore;
use starshop_server::middleware::INIT_DATA_HEADER;
use starshop_server::routes::payments::WEBHOOK_SECRET_HEADER;
use starshop_server::state::{AppState, Stores, TelegramApi};
use starshop_server::telegram::{
    BotMessenger, CreateInvoiceLink, InlineKeyboardMarkup, InvoiceProvider, TelegramError,
    sign_init_data,
};

pub const BOT_TOKEN: &str = "7000000001:AAH-integration-test-token";
pub const WEBHOOK_SECRET: &str = "integration-webhook-secret";
pub const INTERNAL_SECRET: &str = "Xk3-pQ9v-Lm2Rt7w-Zy8Nb4c";
pub const ADMIN_TELEGRAM_ID: i64 = 555_000_111;
pub const CUSTOMER_TELEGRAM_ID: i64 = 123_456_789;

/// Records every Bot API call instead of sending it.
#[derive(Debug, Default)]
pub struct FakeTelegram {
    invoices: Mutex<Vec<CreateInvoiceLink>>,
    answers: Mutex<Vec<(String, Option<String>)>>,
    sent: Mutex<Vec<(i64, String)>>,
}

impl FakeTelegram {
    pub fn invoices(&self) -> Vec<CreateInvoiceLink> {
        self.invoices.lock().expect("lock poisoned").clone()
    }

    /// Pre-checkout answers as `(query_id, error_message)`.
    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.lock().expect("lock poisoned").clone()
    }

    /// Texts sent to one chat.
    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl InvoiceProvider for FakeTelegram {
    async fn create_invoice_link(
        &self,
        invoice: &CreateInvoiceLink,
    ) -> Result<String, TelegramError> {
        let mut invoices = self.invoices.lock().expect("lock poisoned");
        invoices.push(invoice.clone());
        Ok(format!("https://t.me/$invoice-{}", invoices.len()))
    }

    async fn answer_pre_checkout_query(
        &self,
        query_id: &str,
        error_message: Option<&str>,
    ) -> Result<(), TelegramError> {
        self.answers
            .lock()
            .expect("lock poisoned")
            .push((query_id.to_string(), error_message.map(String::from)));
        Ok(())
    }
}

#[async_trait]
impl BotMessenger for FakeTelegram {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _reply_markup: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        self.sent
            .lock()
            .expect("lock poisoned")
            .push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Configuration shared by all tests; rate limits off, short long-polls.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::new(
        SecretString::from("postgres://unused".to_string()),
        "http://localhost:5173",
        SecretString::from(BOT_TOKEN.to_string()),
    );
    config.telegram.webhook_secret = Some(SecretString::from(WEBHOOK_SECRET.to_string()));
    config.internal_api_secret = Some(SecretString::from(INTERNAL_SECRET.to_string()));
    config.admins = AdminAllowList::new([TelegramId::new(ADMIN_TELEGRAM_ID)]);
    config.long_poll = LongPollConfig {
        timeout: Duration::from_millis(800),
        interval: Duration::from_millis(20),
    };
    config.rate_limit_enabled = false;
    config
}

/// A running server plus handles on its fakes.
pub struct TestContext {
    pub client: Client,
    pub base_url: String,
    pub store: Arc<MemoryStore>,
    pub telegram: Arc<FakeTelegram>,
    pub state: AppState,
    server: JoinHandle<()>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = test_config();
        customize(&mut config);

        let store = Arc::new(MemoryStore::new());
        let telegram = Arc::new(FakeTelegram::default());
        let state = AppState::new(
            config,
            Stores::memory(&store),
            TelegramApi {
                invoices: telegram.clone(),
                messenger: telegram.clone(),
            },
            None,
        );

        let app = starshop_server::build_router(
            state.clone(),
            tower_sessions::MemoryStore::default(),
        );
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        let client = Client::builder()
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: format!("http://{addr}"),
            store,
            telegram,
            state,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Freshly signed init data for a user.
    pub fn init_data(telegram_id: i64, username: &str) -> String {
        let user = json!({
            "id": telegram_id,
            "first_name": username,
            "username": username,
        })
        .to_string();
        let auth_date = chrono::Utc::now().timestamp().to_string();
        sign_init_data(&[("auth_date", &auth_date), ("user", &user)], BOT_TOKEN)
            .expect("Failed to sign init data")
    }

    /// Request authenticated with the init data header.
    pub fn request_as(&self, method: Method, path: &str, telegram_id: i64) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(INIT_DATA_HEADER, Self::init_data(telegram_id, "tester"))
    }

    pub fn get_as(&self, path: &str, telegram_id: i64) -> RequestBuilder {
        self.request_as(Method::GET, path, telegram_id)
    }

    pub fn post_as(&self, path: &str, telegram_id: i64) -> RequestBuilder {
        self.request_as(Method::POST, path, telegram_id)
    }

    /// Register a user by hitting `/api/users/me`.
    pub async fn register(&self, telegram_id: i64) -> Value {
        let resp = self
            .get_as("/api/users/me", telegram_id)
            .send()
            .await
            .expect("Request failed");
        assert_eq!(resp.status(), 200);
        resp.json().await.expect("Invalid user JSON")
    }

    /// Add a product in a fresh category.
    pub async fn add_product(&self, title: &str, price: &str) -> ProductId {
        let category = self.store.add_category("Consultations").await;
        let price: Decimal = price.parse().expect("Invalid price");
        self.store.add_product(category.id, title, price).await.id
    }

    /// Deliver a Bot API update with the right secret header.
    pub async fn webhook(&self, update: &Value) -> Response {
        self.client
            .post(self.url("/api/payments/webhook"))
            .header(WEBHOOK_SECRET_HEADER, WEBHOOK_SECRET)
            .json(update)
            .send()
            .await
            .expect("Webhook request failed")
    }

    /// Create an order for a customer; returns the invoice JSON.
    pub async fn buy(&self, telegram_id: i64, product_id: ProductId, quantity: i32) -> Value {
        let resp = self
            .post_as("/api/payments", telegram_id)
            .json(&json!({ "product_id": product_id, "quantity": quantity }))
            .send()
            .await
            .expect("Request failed");
        assert_eq!(resp.status(), 201);
        resp.json().await.expect("Invalid invoice JSON")
    }

    /// Run the pre-checkout and payment webhooks for an order.
    pub async fn pay(&self, telegram_id: i64, order_id: i64, stars: i64) {
        let payload = json!({ "order_id": order_id }).to_string();
        self.webhook(&pre_checkout_update(1, telegram_id, "XTR", stars, &payload))
            .await;
        self.webhook(&payment_update(2, telegram_id, "XTR", stars, &payload))
            .await;
    }

    /// Poll `check` until it holds, for effects of background notifications.
    pub async fn eventually(&self, mut check: impl FnMut(&FakeTelegram) -> bool) -> bool {
        for _ in 0..100 {
            if check(&self.telegram) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.state.shutdown_token().cancel();
        self.server.abort();
    }
}

/// A `pre_checkout_query` update.
pub fn pre_checkout_update(
    update_id: i64,
    telegram_id: i64,
    currency: &str,
    total_amount: i64,
    payload: &str,
) -> Value {
    json!({
        "update_id": update_id,
        "pre_checkout_query": {
            "id": format!("pcq-{update_id}"),
            "from": { "id": telegram_id, "is_bot": false, "first_name": "Buyer" },
            "currency": currency,
            "total_amount": total_amount,
            "invoice_payload": payload,
        }
    })
}

/// A message update carrying `successful_payment`.
pub fn payment_update(
    update_id: i64,
    telegram_id: i64,
    currency: &str,
    total_amount: i64,
    payload: &str,
) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "from": { "id": telegram_id, "is_bot": false, "first_name": "Buyer" },
            "chat": { "id": telegram_id, "type": "private" },
            "successful_payment": {
                "currency": currency,
                "total_amount": total_amount,
                "invoice_payload": payload,
                "telegram_payment_charge_id": format!("charge-{update_id}"),
            }
        }
    })
}

/// A text message update.
pub fn text_update(update_id: i64, telegram_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "from": { "id": telegram_id, "is_bot": false, "first_name": "Alice", "username": "alice" },
            "chat": { "id": telegram_id, "type": "private" },
            "text": text,
        }
    })
}

//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::db::{
    CatalogRepository, CatalogStore, MemoryStore, MessageRepository, MessageStore,
    OrderRepository, OrderStore, UserRepository, UserStore,
};
use crate::services::{
    BotUpdates, BroadcastSink, Catalog, ChatThread, FanoutSink, Notifier, OrderLedger,
    PaymentGateway, TelegramNotifier, UserDirectory,
};
use crate::telegram::{BotClient, BotMessenger, InitDataVerifier, InvoiceProvider};

/// Storage backends, one per entity.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub orders: Arc<dyn OrderStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    /// `PostgreSQL` repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            catalog: Arc::new(CatalogRepository::new(pool.clone())),
            orders: Arc::new(OrderRepository::new(pool.clone())),
            messages: Arc::new(MessageRepository::new(pool.clone())),
        }
    }

    /// Everything backed by one in-memory store.
    #[must_use]
    pub fn memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            catalog: store.clone(),
            orders: store.clone(),
            messages: store.clone(),
        }
    }
}

/// Outbound Bot API seams.
#[derive(Clone)]
pub struct TelegramApi {
    pub invoices: Arc<dyn InvoiceProvider>,
    pub messenger: Arc<dyn BotMessenger>,
}

impl TelegramApi {
    /// Both seams served by the real Bot API client.
    #[must_use]
    pub fn from_client(client: BotClient) -> Self {
        let client = Arc::new(client);
        Self {
            invoices: client.clone(),
            messenger: client,
        }
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the services, configuration and the shutdown token.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pool: Option<PgPool>,
    verifier: InitDataVerifier,
    users: UserDirectory,
    catalog: Catalog,
    ledger: OrderLedger,
    chat: ChatThread,
    payments: PaymentGateway,
    bot: BotUpdates,
    events: BroadcastSink,
    shutdown: CancellationToken,
}

impl AppState {
    /// Wire services together.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration
    /// * `stores` - Storage backends
    /// * `telegram` - Bot API seams
    /// * `pool` - Connection pool for readiness checks, if any
    #[must_use]
    pub fn new(
        config: ServerConfig,
        stores: Stores,
        telegram: TelegramApi,
        pool: Option<PgPool>,
    ) -> Self {
        let users = UserDirectory::new(stores.users, config.admins.clone());
        let catalog = Catalog::new(stores.catalog.clone());
        let ledger = OrderLedger::new(stores.orders, stores.catalog);

        let events = BroadcastSink::default();
        let telegram_notifier = TelegramNotifier::new(
            telegram.messenger.clone(),
            ledger.clone(),
            users.clone(),
            &config.frontend_url,
        );
        let notifier = Notifier::new(Arc::new(FanoutSink::new(vec![
            Arc::new(events.clone()),
            Arc::new(telegram_notifier),
        ])));

        let chat = ChatThread::new(
            stores.messages,
            notifier.clone(),
            config.long_poll,
            config.welcome_message.clone(),
        );
        let payments = PaymentGateway::new(
            ledger.clone(),
            catalog.clone(),
            users.clone(),
            chat.clone(),
            telegram.invoices,
            notifier,
            config.star_rate,
        );
        let bot = BotUpdates::new(
            payments.clone(),
            users.clone(),
            telegram.messenger,
            &config.frontend_url,
        );
        let verifier =
            InitDataVerifier::new(config.telegram.bot_token.clone(), config.init_data_ttl);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                verifier,
                users,
                catalog,
                ledger,
                chat,
                payments,
                bot,
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Production wiring: `PostgreSQL` stores and the real Bot API.
    #[must_use]
    pub fn with_postgres(config: ServerConfig, pool: PgPool) -> Self {
        let client = BotClient::new(
            config.telegram.api_url.clone(),
            config.telegram.bot_token.clone(),
        );
        Self::new(
            config,
            Stores::postgres(&pool),
            TelegramApi::from_client(client),
            Some(pool),
        )
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Connection pool, absent when running on in-memory stores.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn verifier(&self) -> &InitDataVerifier {
        &self.inner.verifier
    }

    #[must_use]
    pub fn users(&self) -> &UserDirectory {
        &self.inner.users
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    #[must_use]
    pub fn ledger(&self) -> &OrderLedger {
        &self.inner.ledger
    }

    #[must_use]
    pub fn chat(&self) -> &ChatThread {
        &self.inner.chat
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentGateway {
        &self.inner.payments
    }

    #[must_use]
    pub fn bot(&self) -> &BotUpdates {
        &self.inner.bot
    }

    /// In-process stream of chat events.
    #[must_use]
    pub fn events(&self) -> &BroadcastSink {
        &self.inner.events
    }

    /// Cancelled when the server starts shutting down.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}

//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                              - Liveness
//! GET  /health/ready                        - Readiness (database)
//!
//! # Auth
//! POST /api/auth/login                      - Init data or bot-channel login
//! POST /api/auth/logout                     - End session
//! GET  /api/users/me                        - Current user
//!
//! # Catalog
//! GET  /api/products                        - Product listing (?category_id=)
//! GET  /api/products/{id}                   - Product detail
//! GET  /api/categories                      - Category listing
//!
//! # Orders and payments
//! GET  /api/orders                          - Caller's orders
//! GET  /api/orders/{id}                     - Order detail (owner/admin)
//! POST /api/payments                        - Create order + Stars invoice
//! POST /api/payments/{order_id}/invoice     - Re-issue invoice (owner)
//! POST /api/payments/webhook                - Bot API webhook, always 200 {}
//!
//! # Chat
//! GET    /api/messages                      - Caller's threads
//! GET    /api/messages/{order_id}?since=    - History
//! GET    /api/messages/{order_id}/poll?after= - Long-poll
//! POST   /api/messages/{order_id}           - Post message
//! POST   /api/messages/{order_id}/read      - Mark counterpart's messages read
//! DELETE /api/messages/{message_id}         - Delete message (sender/admin)
//!
//! # Admin
//! GET  /api/admin/orders?status=            - All orders
//! GET  /api/admin/messages                  - All threads
//! POST /api/admin/messages/{message_id}/reply - Reply to a message
//! DELETE /api/admin/messages/{order_id}    - Clear an order thread
//! GET  /api/admin/stats                     - Dashboard counters
//! ```

pub mod admin;
pub mod auth;
pub mod catalog;
pub mod health;
pub mod messages;
pub mod orders;
pub mod payments;
pub mod users;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::middleware::rate_limit::{RateLimiterLayer, auth_rate_limiter, payment_rate_limiter};
use crate::state::AppState;

fn limited(router: Router<AppState>, limiter: Option<RateLimiterLayer>) -> Router<AppState> {
    match limiter {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

/// Create the auth routes router.
pub fn auth_routes(rate_limit: bool) -> Router<AppState> {
    let login = Router::new().route("/login", post(auth::login));
    let login = if rate_limit {
        limited(login, auth_rate_limiter())
    } else {
        login
    };

    login.route("/logout", post(auth::logout))
}

/// Create the catalog routes router.
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(catalog::list_products))
        .route("/products/{id}", get(catalog::get_product))
        .route("/categories", get(catalog::list_categories))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::list))
        .route("/{id}", get(orders::show))
}

/// Create the payment routes router.
///
/// The webhook sits outside the rate limiter.
pub fn payment_routes(rate_limit: bool) -> Router<AppState> {
    let invoices = Router::new()
        .route("/", post(payments::init_payment))
        .route("/{order_id}/invoice", post(payments::retry_invoice));
    let invoices = if rate_limit {
        limited(invoices, payment_rate_limiter())
    } else {
        invoices
    };

    invoices.route("/webhook", post(payments::webhook))
}

/// Create the chat routes router.
pub fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(messages::threads))
        .route(
            "/{id}",
            get(messages::history)
                .post(messages::post_message)
                .delete(messages::delete_message),
        )
        .route("/{id}/poll", get(messages::poll))
        .route("/{id}/read", post(messages::mark_read))
}

/// Create the admin routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(admin::orders))
        .route("/messages", get(admin::threads))
        .route("/messages/{id}", delete(admin::clear_thread))
        .route("/messages/{id}/reply", post(admin::reply))
        .route("/stats", get(admin::stats))
}

/// Create all JSON API routes, to be nested under `/api`.
pub fn api_routes(rate_limit: bool) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth_routes(rate_limit))
        .route("/users/me", get(users::me))
        .merge(catalog_routes())
        .nest("/orders", order_routes())
        .nest("/payments", payment_routes(rate_limit))
        .nest("/messages", message_routes())
        .nest("/admin", admin_routes())
}

/// Health probes, mounted at the root.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
}

//! Starshop server library.
//!
//! Backend of a Telegram Mini App shop: init data authentication, a product
//! catalog, orders paid in Telegram Stars, and a per-order chat between the
//! customer and the shop's operators. Exposed as a library so the binary and
//! the integration tests build the exact same router.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod telegram;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::SessionStore;

use crate::middleware::{INIT_DATA_HEADER, create_session_layer, request_id_middleware};
use crate::state::AppState;

/// CORS for the Mini App origin, with credentials for the session cookie.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(INIT_DATA_HEADER),
        ])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!(frontend_url, "Frontend URL is not a valid origin, CORS disabled");
            layer
        }
    }
}

/// Build the full application router.
///
/// Sentry layers are added by the binary so tests stay free of a global hub.
pub fn build_router<Store>(state: AppState, session_store: Store) -> Router
where
    Store: SessionStore + Clone,
{
    let session_layer = create_session_layer(session_store, state.config());
    let cors = cors_layer(&state.config().frontend_url);
    let rate_limit = state.config().rate_limit_enabled;

    Router::new()
        .merge(routes::health_routes())
        .nest("/api", routes::api_routes(rate_limit))
        .layer(session_layer)
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

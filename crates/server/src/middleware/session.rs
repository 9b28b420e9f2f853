//! Session middleware configuration.
//!
//! Sessions hold only the logged-in identity. Production uses the
//! `PostgreSQL` store; tests use the in-memory store from tower-sessions.

use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};

use crate::config::ServerConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "tg_session";

/// Session expiry time in seconds (7 days).
const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Create the session layer over any session store.
///
/// # Arguments
///
/// * `store` - Session store (`PostgresStore` in production)
/// * `config` - Server configuration (frontend URL decides the `Secure` flag)
#[must_use]
pub fn create_session_layer<Store>(
    store: Store,
    config: &ServerConfig,
) -> SessionManagerLayer<Store>
where
    Store: SessionStore + Clone,
{
    // The Mini App is served over HTTPS in production.
    let is_secure = config.frontend_url.starts_with("https://");

    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(is_secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

//! HTTP middleware stack.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, added in `main`)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. CORS (Mini App origin only)
//! 5. Session layer (tower-sessions)
//! 6. Rate limiting on login and invoice routes (governor)
//!
//! Authentication itself happens in the [`CurrentUser`] and [`RequireAdmin`]
//! extractors.

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use auth::{
    CurrentUser, INIT_DATA_HEADER, RequireAdmin, clear_current_session, set_current_session,
};
pub use rate_limit::{auth_rate_limiter, payment_rate_limiter};
pub use request_id::request_id_middleware;
pub use session::create_session_layer;

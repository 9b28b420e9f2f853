//! Authentication extractors.
//!
//! A request is authenticated by a signed `X-Telegram-Init-Data` header,
//! verified on every request, or by a session established at login. Either
//! way the user is loaded fresh and the admin flag is re-derived from the
//! allow-list.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use tracing::debug;

use crate::error::{AppError, set_sentry_user};
use crate::models::{CurrentSession, User, UserProfile, session_keys};
use crate::services::ensure_admin;
use crate::state::AppState;
use crate::telegram::AuthError;

/// Header carrying the Mini App's raw init data.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Extractor that requires an authenticated user.
///
/// # Example
///
/// ```rust,ignore
/// async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
///     Json(user)
/// }
/// ```
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = if let Some(raw) = parts.headers.get(INIT_DATA_HEADER) {
            let raw = raw
                .to_str()
                .map_err(|_| AppError::Auth(AuthError::InvalidSignature))?;
            let init_data = state.verifier().verify(raw)?;
            state
                .users()
                .get_or_create(init_data.user.id, &UserProfile::from(&init_data.user))
                .await?
        } else {
            let session = parts
                .extensions
                .get::<Session>()
                .ok_or(AuthError::Unauthenticated)?;
            let current: CurrentSession = session
                .get(session_keys::CURRENT_USER)
                .await
                .ok()
                .flatten()
                .ok_or(AuthError::Unauthenticated)?;

            match state.users().get(current.user_id).await? {
                Some(user) if user.telegram_id == current.telegram_id => user,
                _ => {
                    debug!(user_id = %current.user_id, "Session refers to unknown user");
                    return Err(AuthError::Unauthenticated.into());
                }
            }
        };

        set_sentry_user(&user.id, user.username.as_deref());
        Ok(Self(user))
    }
}

/// Extractor that requires an operator.
///
/// Rejects anonymous callers with 401 and authenticated non-operators with 403.
pub struct RequireAdmin(pub User);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        ensure_admin(&user)?;
        Ok(Self(user))
    }
}

/// Helper to store the logged-in user in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_session(
    session: &Session,
    user: &User,
) -> Result<(), tower_sessions::session::Error> {
    // New identity, new session id.
    session.cycle_id().await?;
    session
        .insert(
            session_keys::CURRENT_USER,
            CurrentSession {
                user_id: user.id,
                telegram_id: user.telegram_id,
            },
        )
        .await
}

/// Helper to clear the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_session(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}

//! Login and logout.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use starshop_core::TelegramId;

use crate::config::secret_matches;
use crate::error::{AppError, Result, clear_sentry_user};
use crate::middleware::{clear_current_session, set_current_session};
use crate::models::{User, UserProfile};
use crate::state::AppState;

/// Header the bot process uses to prove it holds the internal secret.
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// Login body: either Mini App init data or, for the bot channel, a bare
/// Telegram identity.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub init_data: Option<String>,
    pub telegram_id: Option<TelegramId>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Verify the caller and start a session.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<User>> {
    let user = if let Some(raw) = body.init_data.as_deref() {
        let init_data = state.verifier().verify(raw)?;
        state
            .users()
            .get_or_create(init_data.user.id, &UserProfile::from(&init_data.user))
            .await?
    } else if let Some(telegram_id) = body.telegram_id {
        let Some(expected) = state.config().internal_api_secret.as_ref() else {
            return Err(AppError::Unauthorized("bot login is disabled".to_string()));
        };
        let presented = headers
            .get(INTERNAL_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !secret_matches(expected, presented) {
            warn!(telegram_id = %telegram_id, "Bot login with wrong internal secret");
            return Err(AppError::Unauthorized("invalid internal secret".to_string()));
        }

        let profile = UserProfile {
            username: body.username,
            first_name: body.first_name,
            last_name: body.last_name,
        };
        state.users().get_or_create(telegram_id, &profile).await?
    } else {
        return Err(AppError::BadRequest(
            "init_data or telegram_id is required".to_string(),
        ));
    };

    set_current_session(&session, &user)
        .await
        .map_err(|e| AppError::Internal(format!("session: {e}")))?;

    info!(user_id = %user.id, telegram_id = %user.telegram_id, "User logged in");
    Ok(Json(user))
}

/// End the session.
pub async fn logout(session: Session) -> Result<StatusCode> {
    clear_current_session(&session)
        .await
        .map_err(|e| AppError::Internal(format!("session: {e}")))?;
    clear_sentry_user();
    Ok(StatusCode::NO_CONTENT)
}

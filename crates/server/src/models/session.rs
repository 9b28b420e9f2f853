//! Session-related types.
//!
//! Types stored in the session for authentication state.

use serde::{Deserialize, Serialize};

use starshop_core::{TelegramId, UserId};

/// Session-stored user identity.
///
/// Only identity is stored. The admin flag is re-derived from the allow-list
/// on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentSession {
    /// User's database ID.
    pub user_id: UserId,
    /// User's Telegram ID.
    pub telegram_id: TelegramId,
}

/// Session keys for authentication data.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";
}

//! User domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use starshop_core::{TelegramId, UserId};

use crate::telegram::WebAppUser;

/// A shop user, identified by their Telegram account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub telegram_id: TelegramId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Derived from the operator allow-list when the user is loaded.
    pub is_admin: bool,
    /// Stars balance. Never negative.
    pub stars: i64,
    pub total_orders: i32,
    pub total_spent: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Best human readable name: `@username`, then full name, then the id.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("@{username}");
        }
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            format!("user {}", self.telegram_id)
        } else {
            full
        }
    }
}

/// Mutable profile fields refreshed on every login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&WebAppUser> for UserProfile {
    fn from(user: &WebAppUser) -> Self {
        Self {
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

/// Data needed to insert a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub telegram_id: TelegramId,
    pub profile: UserProfile,
    pub is_admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: Option<&str>, first: Option<&str>, last: Option<&str>) -> User {
        User {
            id: UserId::new(1),
            telegram_id: TelegramId::new(42),
            username: username.map(String::from),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            is_admin: false,
            stars: 0,
            total_orders: 0,
            total_spent: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(user(Some("anna"), Some("Anna"), None).display_name(), "@anna");
        assert_eq!(user(None, Some("Anna"), Some("K")).display_name(), "Anna K");
        assert_eq!(user(Some(""), None, None).display_name(), "user 42");
    }
}

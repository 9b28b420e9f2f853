//! User directory keyed by Telegram id.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use starshop_core::{TelegramId, UserId};

use crate::config::AdminAllowList;
use crate::db::{RepositoryError, UserStore};
use crate::models::{NewUser, User, UserProfile};

/// Get-or-create access to users, with admin status derived from the
/// operator allow-list on every load.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    admins: Arc<AdminAllowList>,
}

impl UserDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, admins: AdminAllowList) -> Self {
        Self {
            store,
            admins: Arc::new(admins),
        }
    }

    /// Whether a Telegram id is on the operator allow-list.
    #[must_use]
    pub fn is_admin(&self, telegram_id: TelegramId) -> bool {
        self.admins.contains(telegram_id)
    }

    /// Look up a user by Telegram id, creating them on first sight.
    ///
    /// Mutable profile fields and the admin flag are refreshed on every call.
    /// Concurrent first logins of the same account resolve to one row: the
    /// losing insert hits the unique constraint and re-reads the winner.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    #[instrument(skip(self, profile), fields(telegram_id = %telegram_id))]
    pub async fn get_or_create(
        &self,
        telegram_id: TelegramId,
        profile: &UserProfile,
    ) -> Result<User, RepositoryError> {
        let is_admin = self.is_admin(telegram_id);

        if let Some(existing) = self.store.find_by_telegram_id(telegram_id).await? {
            return self.store.update_profile(existing.id, profile, is_admin).await;
        }

        let new_user = NewUser {
            telegram_id,
            profile: profile.clone(),
            is_admin,
        };
        match self.store.insert(&new_user).await {
            Ok(user) => {
                debug!(user_id = %user.id, is_admin, "Registered new user");
                Ok(user)
            }
            Err(RepositoryError::Conflict(_)) => {
                debug!("Concurrent registration, re-reading user");
                let existing = self
                    .store
                    .find_by_telegram_id(telegram_id)
                    .await?
                    .ok_or(RepositoryError::NotFound)?;
                self.store.update_profile(existing.id, profile, is_admin).await
            }
            Err(e) => Err(e),
        }
    }

    /// Load a user by id with a freshly derived admin flag.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.store.get(id).await?.map(|user| self.with_admin_flag(user)))
    }

    /// Load a user by Telegram id with a freshly derived admin flag.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn get_by_telegram_id(
        &self,
        telegram_id: TelegramId,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .store
            .find_by_telegram_id(telegram_id)
            .await?
            .map(|user| self.with_admin_flag(user)))
    }

    /// Overwrite the stored admin flag with the current allow-list verdict.
    #[must_use]
    pub fn with_admin_flag(&self, mut user: User) -> User {
        user.is_admin = self.is_admin(user.telegram_id);
        user
    }

    /// Count a completed purchase against the user's totals.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn record_purchase(&self, id: UserId, amount: Decimal) -> Result<(), RepositoryError> {
        self.store.record_purchase(id, amount).await
    }

    /// Registered users that are currently on the allow-list.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn admins(&self) -> Result<Vec<User>, RepositoryError> {
        let ids: Vec<TelegramId> = self.admins.iter().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.store.list_by_telegram_ids(&ids).await?;
        Ok(users
            .into_iter()
            .map(|user| self.with_admin_flag(user))
            .collect())
    }

    /// Telegram ids of all operators, registered or not.
    #[must_use]
    pub fn admin_telegram_ids(&self) -> Vec<TelegramId> {
        let mut ids: Vec<TelegramId> = self.admins.iter().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered users.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn count(&self) -> Result<i64, RepositoryError> {
        self.store.count().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    const ADMIN: TelegramId = TelegramId::new(1000);
    const CUSTOMER: TelegramId = TelegramId::new(123_456_789);

    fn directory(store: Arc<MemoryStore>) -> UserDirectory {
        UserDirectory::new(store, AdminAllowList::new([ADMIN]))
    }

    fn profile(username: &str) -> UserProfile {
        UserProfile {
            username: Some(username.to_string()),
            ..UserProfile::default()
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let users = directory(store.clone());

        let first = users.get_or_create(CUSTOMER, &profile("anna")).await.unwrap();
        let second = users.get_or_create(CUSTOMER, &profile("anna_k")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.username.as_deref(), Some("anna_k"));
        assert!(!second.is_admin);
        assert_eq!(store.count_telegram_id(CUSTOMER).await, 1);
    }

    #[tokio::test]
    async fn test_missing_profile_fields_keep_stored_values() {
        let store = Arc::new(MemoryStore::new());
        let users = directory(store);

        users.get_or_create(CUSTOMER, &profile("anna")).await.unwrap();
        let refreshed = users
            .get_or_create(CUSTOMER, &UserProfile::default())
            .await
            .unwrap();
        assert_eq!(refreshed.username.as_deref(), Some("anna"));
    }

    #[tokio::test]
    async fn test_admin_flag_comes_from_allow_list() {
        let store = Arc::new(MemoryStore::new());
        let admin = directory(store.clone())
            .get_or_create(ADMIN, &UserProfile::default())
            .await
            .unwrap();
        assert!(admin.is_admin);

        // Removing the id from the list demotes on the next load.
        let demoted = UserDirectory::new(store, AdminAllowList::default())
            .get(admin.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!demoted.is_admin);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_login_creates_one_row() {
        let store = Arc::new(MemoryStore::new());
        let users = directory(store.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let users = users.clone();
                tokio::spawn(async move {
                    users
                        .get_or_create(CUSTOMER, &UserProfile::default())
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.count_telegram_id(CUSTOMER).await, 1);
    }

    #[tokio::test]
    async fn test_admins_lists_registered_operators() {
        let store = Arc::new(MemoryStore::new());
        let users = directory(store);
        assert!(users.admins().await.unwrap().is_empty());

        users.get_or_create(ADMIN, &UserProfile::default()).await.unwrap();
        users.get_or_create(CUSTOMER, &UserProfile::default()).await.unwrap();

        let admins = users.admins().await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].telegram_id, ADMIN);
        assert_eq!(users.count().await.unwrap(), 2);
    }
}

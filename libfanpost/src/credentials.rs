//! Credential store abstraction
//!
//! The dispatch engine never owns credentials. It reads a user's connected
//! accounts through [`CredentialStore`] and writes back rotated secrets after
//! a successful token refresh. Account linking populates the store and is
//! handled elsewhere.
//!
//! Two backends ship with the crate:
//! - [`MemoryCredentialStore`]: owned in-process state, for embedding and tests
//! - [`crate::db::Database`]: SQLite-backed persistent storage

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CredentialError, Result};
use crate::types::{Account, ConnectionState, TokenPair};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Accounts owned by `user_id` whose connection state is `connected`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn get_connected_accounts(&self, user_id: &str) -> Result<Vec<Account>>;

    /// Persist a refreshed token pair for one account
    ///
    /// `new_refresh = None` keeps the stored refresh secret. Only the row
    /// identified by both `account_id` and `user_id` is touched.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if no such account exists for the
    /// user, or a backend error if the write fails.
    async fn update_secrets(
        &self,
        account_id: &str,
        user_id: &str,
        new_access: &str,
        new_refresh: Option<&str>,
    ) -> Result<()>;

    /// Short backend identifier for logs
    fn backend_name(&self) -> &str;
}

/// In-memory credential store keyed by account id
#[derive(Default)]
pub struct MemoryCredentialStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let map = accounts
            .into_iter()
            .map(|account| (account.id.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(map),
        }
    }

    /// Insert or replace an account
    pub async fn insert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account);
    }

    /// Snapshot of a stored account, regardless of owner or state
    pub async fn get(&self, account_id: &str) -> Option<Account> {
        self.accounts.read().await.get(account_id).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_connected_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut owned: Vec<Account> = accounts
            .values()
            .filter(|a| a.user_id == user_id && a.connection_state == ConnectionState::Connected)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(owned)
    }

    async fn update_secrets(
        &self,
        account_id: &str,
        user_id: &str,
        new_access: &str,
        new_refresh: Option<&str>,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(account_id)
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| CredentialError::NotFound {
                account_id: account_id.to_string(),
                user_id: user_id.to_string(),
            })?;

        let tokens = TokenPair::new(new_access, new_refresh.map(str::to_string));
        *account = account.with_tokens(&tokens);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

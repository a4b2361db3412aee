//! Uniform refresh-and-retry policy around every adapter call
//!
//! One policy for every provider:
//!
//! 1. Publish with the stored access secret.
//! 2. If the adapter reports `PlatformError::Authentication`, the adapter
//!    supports refresh and the account holds a refresh secret, refresh once,
//!    persist the new pair through the credential store and publish once more.
//! 3. Anything else is terminal: a refresh failure, a missing refresh secret
//!    or a second authentication failure becomes a reconnect outcome, every
//!    other error is returned as a failed outcome unchanged.
//!
//! `Platform::publish` therefore runs at most twice and
//! `Platform::refresh_token` at most once per dispatch unit.

use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::CredentialStore;
use crate::error::PlatformError;
use crate::platforms::Platform;
use crate::types::{Account, AccountSettings, MediaItem, PublishOutcome};

pub struct ResilientPublisher {
    store: Arc<dyn CredentialStore>,
}

impl ResilientPublisher {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Publish for one account and always come back with an outcome
    pub async fn invoke(
        &self,
        platform: &dyn Platform,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        settings: &AccountSettings,
    ) -> PublishOutcome {
        let mut outcome = self
            .run(platform, account, content, media, settings)
            .await;
        if outcome.channel.is_none() {
            outcome.channel = platform.channel(account, settings);
        }
        outcome
    }

    async fn run(
        &self,
        platform: &dyn Platform,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        settings: &AccountSettings,
    ) -> PublishOutcome {
        let reason = match platform.publish(account, content, media, settings).await {
            Ok(published) => return PublishOutcome::published(account, published),
            Err(PlatformError::Authentication(reason)) => reason,
            Err(PlatformError::Reconnect(reason)) => {
                return PublishOutcome::reconnect(account, &reason)
            }
            Err(e) => return PublishOutcome::failed(account, &e),
        };

        if !platform.supports_refresh() {
            return PublishOutcome::reconnect(account, &reason);
        }
        if !account.has_refresh_secret() {
            info!(
                "{} account {} was refused and has no refresh token",
                platform.name(),
                account.id
            );
            return PublishOutcome::reconnect(account, &reason);
        }

        info!(
            "{} refused the access token for account {}, refreshing",
            platform.name(),
            account.id
        );
        let tokens = match platform.refresh_token(account).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    "Token refresh for {} account {} failed: {}",
                    platform.name(),
                    account.id,
                    e
                );
                return PublishOutcome::reconnect(account, e.message());
            }
        };

        // The retry goes ahead even when the write fails; the next dispatch
        // will simply refresh again.
        if let Err(e) = self
            .store
            .update_secrets(
                &account.id,
                &account.user_id,
                tokens.access_token(),
                tokens.refresh_token(),
            )
            .await
        {
            warn!(
                "Could not persist refreshed credentials for account {} in {} store: {}",
                account.id,
                self.store.backend_name(),
                e
            );
        }

        let refreshed = account.with_tokens(&tokens);
        match platform.publish(&refreshed, content, media, settings).await {
            Ok(published) => {
                info!(
                    "Published to {} account {} after token refresh",
                    platform.name(),
                    account.id
                );
                PublishOutcome::published(account, published).with_attempts(2, true)
            }
            Err(PlatformError::Authentication(reason)) | Err(PlatformError::Reconnect(reason)) => {
                warn!(
                    "{} refused refreshed credentials for account {}",
                    platform.name(),
                    account.id
                );
                PublishOutcome::reconnect(account, &reason).with_attempts(2, true)
            }
            Err(e) => PublishOutcome::failed(account, &e).with_attempts(2, true),
        }
    }
}

//! Dispatch orchestrator
//!
//! Fans one [`PublishRequest`] out to every resolved account, one tokio task
//! per account, waits for all of them and folds the outcomes into an
//! [`AggregateResult`]. Only request-level validation makes `dispatch` fail;
//! provider failures, panics included, become per-account outcomes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::error::{Result, ValidationError};
use crate::media::MediaNormalizer;
use crate::platforms::PlatformRegistry;
use crate::resilience::ResilientPublisher;
use crate::tracker::{PostTracker, TrackedPost};
use crate::types::{Account, AggregateResult, FailureKind, PublishOutcome, PublishRequest};

const DEFAULT_TRACKER_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    store: Arc<dyn CredentialStore>,
    tracker: Arc<dyn PostTracker>,
    registry: Arc<PlatformRegistry>,
    publisher: Arc<ResilientPublisher>,
    normalizer: MediaNormalizer,
    tracker_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tracker: Arc<dyn PostTracker>,
        registry: PlatformRegistry,
    ) -> Self {
        let publisher = Arc::new(ResilientPublisher::new(store.clone()));
        Self {
            store,
            tracker,
            registry: Arc::new(registry),
            publisher,
            normalizer: MediaNormalizer::default(),
            tracker_timeout: DEFAULT_TRACKER_TIMEOUT,
        }
    }

    pub fn with_normalizer(mut self, normalizer: MediaNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Upper bound on the best-effort tracker write
    pub fn with_tracker_timeout(mut self, timeout: Duration) -> Self {
        self.tracker_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    /// Publish `request` for `user_id` to every selected, connected account
    ///
    /// # Errors
    ///
    /// Returns `FanpostError::Validation` when no account is selected, the
    /// post has neither text nor media, none of the selected accounts is
    /// connected, or a media item is invalid. No provider is contacted in
    /// those cases. A credential store failure while loading accounts is
    /// also returned.
    pub async fn dispatch(
        &self,
        user_id: &str,
        request: PublishRequest,
    ) -> Result<AggregateResult> {
        let PublishRequest {
            content,
            media,
            target_accounts,
            mut settings,
        } = request;

        let mut seen = HashSet::new();
        let targets: Vec<String> = target_accounts
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if targets.is_empty() {
            return Err(ValidationError::NoAccountsSelected.into());
        }
        if content.trim().is_empty() && media.is_empty() {
            return Err(ValidationError::EmptyPost.into());
        }

        let accounts = self.resolve_accounts(user_id, &targets).await?;
        if accounts.is_empty() {
            return Err(ValidationError::NoValidAccounts.into());
        }

        let media = self.normalizer.normalize(media)?;
        let media_count = media.len();

        info!(
            "Dispatching post for user {} to {} account(s) with {} media item(s)",
            user_id,
            accounts.len(),
            media_count
        );

        let content: Arc<str> = Arc::from(content.as_str());
        let mut handles = Vec::with_capacity(accounts.len());
        for account in accounts {
            let account_settings = settings.remove(&account.id).unwrap_or_default();
            let platform = self.registry.get(account.provider);
            let publisher = self.publisher.clone();
            let content = content.clone();
            let media = media.clone();
            let unit_account = account.clone();

            let handle = tokio::spawn(async move {
                let account = unit_account;
                let Some(platform) = platform else {
                    warn!(
                        "No adapter registered for {}; skipping account {}",
                        account.provider, account.id
                    );
                    return PublishOutcome::failed_with(
                        &account,
                        FailureKind::Unsupported,
                        format!(
                            "{} is not configured on this server",
                            account.provider.display_name()
                        ),
                    );
                };

                info!("Publishing to {} account {}", platform.name(), account.id);
                let outcome = publisher
                    .invoke(platform.as_ref(), &account, &content, &media, &account_settings)
                    .await;
                log_outcome(&outcome);
                outcome
            });
            handles.push((account, handle));
        }

        let (accounts, handles): (Vec<Account>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        let outcomes: Vec<PublishOutcome> = accounts
            .iter()
            .zip(joined)
            .map(|(account, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        "publish task was cancelled".to_string()
                    };
                    warn!("Publish task for account {} died: {}", account.id, reason);
                    PublishOutcome::failed_with(
                        account,
                        FailureKind::Internal,
                        format!("Internal error while publishing: {}", reason),
                    )
                }
            })
            .collect();

        let result = AggregateResult::from_outcomes(outcomes);
        info!("{}", result.message);

        self.track(user_id, &content, media_count, &result).await;

        Ok(result)
    }

    /// Selected accounts the user owns and that are still connected, in
    /// the order the store returns them
    async fn resolve_accounts(&self, user_id: &str, targets: &[String]) -> Result<Vec<Account>> {
        let wanted: HashSet<&str> = targets.iter().map(String::as_str).collect();
        let accounts: Vec<Account> = self
            .store
            .get_connected_accounts(user_id)
            .await?
            .into_iter()
            .filter(|a| wanted.contains(a.id.as_str()))
            .filter(Account::is_connected)
            .collect();

        if accounts.len() < wanted.len() {
            debug!(
                "{} of {} selected account(s) are unknown or disconnected for user {}",
                wanted.len() - accounts.len(),
                wanted.len(),
                user_id
            );
        }
        Ok(accounts)
    }

    async fn track(
        &self,
        user_id: &str,
        content: &str,
        media_count: usize,
        result: &AggregateResult,
    ) {
        let post = TrackedPost::new(content, media_count, result.clone());
        let recording = self.tracker.record(user_id, &post);
        match tokio::time::timeout(self.tracker_timeout, recording).await {
            Ok(Ok(())) => debug!("Recorded dispatch {}", post.dispatch_id),
            Ok(Err(e)) => warn!("Failed to record dispatch {}: {}", post.dispatch_id, e),
            Err(_) => warn!(
                "Recording dispatch {} timed out after {:?}",
                post.dispatch_id, self.tracker_timeout
            ),
        }
    }
}

fn log_outcome(outcome: &PublishOutcome) {
    if outcome.success {
        info!(
            "Published to {} account {}: {}",
            outcome.provider,
            outcome.account_id,
            outcome.post_id.as_deref().unwrap_or("-")
        );
    } else {
        warn!(
            "Publishing to {} account {} failed ({}): {}",
            outcome.provider,
            outcome.account_id,
            outcome.error_kind.map(|k| k.to_string()).unwrap_or_default(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "adapter panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::error::FanpostError;
    use crate::platforms::mock::MockPlatform;
    use crate::tracker::MemoryTracker;
    use crate::types::Provider;

    fn store() -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::with_accounts(vec![
            Account::new("r1", "u1", Provider::Reddit, "alice", "t-r"),
            Account::new("t1", "u1", Provider::Twitter, "alice", "t-t"),
            Account::new("t2", "u1", Provider::Twitter, "alice2", "t-t2").disconnected(),
            Account::new("x1", "u2", Provider::Reddit, "bob", "t-x"),
        ]))
    }

    #[tokio::test]
    async fn test_duplicate_targets_publish_once() {
        let reddit = MockPlatform::success(Provider::Reddit);
        let mut registry = PlatformRegistry::new();
        registry.register(Arc::new(reddit.clone()));
        let dispatcher = Dispatcher::new(store(), Arc::new(MemoryTracker::new()), registry);

        let result = dispatcher
            .dispatch("u1", PublishRequest::new("hi").to_accounts(["r1", "r1", "r1"]))
            .await
            .unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(reddit.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_and_disconnected_accounts_are_dropped() {
        let mut registry = PlatformRegistry::new();
        registry.register(Arc::new(MockPlatform::success(Provider::Reddit)));
        registry.register(Arc::new(MockPlatform::success(Provider::Twitter)));
        let dispatcher = Dispatcher::new(store(), Arc::new(MemoryTracker::new()), registry);

        let result = dispatcher
            .dispatch("u1", PublishRequest::new("hi").to_accounts(["r1", "t2", "x1"]))
            .await
            .unwrap();

        assert_eq!(result.total, 1);
        assert!(result.outcomes.contains_key("r1"));

        let err = dispatcher
            .dispatch("u1", PublishRequest::new("hi").to_accounts(["t2", "x1"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FanpostError::Validation(ValidationError::NoValidAccounts)
        ));
    }

    #[tokio::test]
    async fn test_empty_post_rejected() {
        let tracker = Arc::new(MemoryTracker::new());
        let dispatcher = Dispatcher::new(store(), tracker.clone(), PlatformRegistry::new());

        let err = dispatcher
            .dispatch("u1", PublishRequest::new("   ").to_accounts(["r1"]))
            .await
            .unwrap_err();

        assert!(matches!(err, FanpostError::Validation(ValidationError::EmptyPost)));
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_adapter_is_unsupported_outcome() {
        let mut registry = PlatformRegistry::new();
        registry.register(Arc::new(MockPlatform::success(Provider::Reddit)));
        let dispatcher = Dispatcher::new(store(), Arc::new(MemoryTracker::new()), registry);

        let result = dispatcher
            .dispatch("u1", PublishRequest::new("hi").to_accounts(["r1", "t1"]))
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        let twitter = &result.outcomes["t1"];
        assert_eq!(twitter.error_kind, Some(FailureKind::Unsupported));
        assert_eq!(twitter.attempts, 0);
    }

    #[tokio::test]
    async fn test_settings_reach_only_their_account() {
        let reddit = MockPlatform::success(Provider::Reddit).with_channel("rust");
        let mut registry = PlatformRegistry::new();
        registry.register(Arc::new(reddit));
        let dispatcher = Dispatcher::new(store(), Arc::new(MemoryTracker::new()), registry);

        let result = dispatcher
            .dispatch(
                "u1",
                PublishRequest::new("hi")
                    .to_accounts(["r1"])
                    .with_setting("r1", "subreddit", "rust"),
            )
            .await
            .unwrap();
        assert_eq!(result.outcomes["r1"].channel.as_deref(), Some("rust"));
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(42_u8)), "adapter panicked");
    }
}

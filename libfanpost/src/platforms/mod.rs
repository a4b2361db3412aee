//! Provider adapter contract and implementations
//!
//! Every provider is reached through the [`Platform`] trait. An adapter gets
//! an account, the post text, the normalized media and the per-account
//! settings, and either reports where the post landed or returns a
//! classified [`PlatformError`]. Token refresh and retry are not an adapter
//! concern: adapters only expose a refresh hook, and
//! [`crate::resilience::ResilientPublisher`] applies the policy uniformly.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libfanpost::platforms::{mock::MockPlatform, PlatformRegistry};
//! use libfanpost::types::Provider;
//!
//! let mut registry = PlatformRegistry::new();
//! registry.register(Arc::new(MockPlatform::success(Provider::Reddit)));
//! assert!(registry.get(Provider::Reddit).is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{ConfigError, PlatformError, Result};
use crate::types::{Account, AccountSettings, MediaItem, Provider, Published, TokenPair};

pub mod mastodon;
pub mod media_host;
pub mod reddit;
pub mod telegram;
pub mod twitter;
pub mod youtube;

// Available in all builds so integration tests and embedders can use it
pub mod mock;

/// Publish contract implemented once per provider
#[async_trait]
pub trait Platform: Send + Sync {
    /// The provider this adapter publishes to
    fn provider(&self) -> Provider;

    /// Lowercase identifier for logs
    fn name(&self) -> &str {
        self.provider().as_str()
    }

    /// Maximum characters accepted in the post text, if the provider has a limit
    fn character_limit(&self) -> Option<usize>;

    /// Check provider-specific requirements before any network call
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` when the text or media cannot be
    /// published to this provider, e.g. a video-only provider given no video.
    fn validate(
        &self,
        content: &str,
        media: &[MediaItem],
    ) -> std::result::Result<(), PlatformError> {
        let _ = media;
        if let Some(limit) = self.character_limit() {
            let count = content.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    self.provider().display_name(),
                    limit,
                    count
                )));
            }
        }
        Ok(())
    }

    /// Publish one post for one account
    ///
    /// Content rejections, transport faults and expired credentials are all
    /// returned as errors; an adapter never panics on a provider response.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` when the access secret was refused
    ///   and a refresh might help
    /// - `PlatformError::Reconnect` when the account must be relinked
    /// - `PlatformError::Validation` / `PlatformError::Rejected` for content
    ///   problems, carrying the provider's message
    /// - `PlatformError::Network` / `RateLimit` / `Posting` / `MediaUpload`
    ///   for transient faults
    async fn publish(
        &self,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        settings: &AccountSettings,
    ) -> std::result::Result<Published, PlatformError>;

    /// Sub-channel a post for this account would land in, e.g. a subreddit
    ///
    /// Used to attribute failed outcomes; successful publishes report the
    /// channel themselves.
    fn channel(&self, account: &Account, settings: &AccountSettings) -> Option<String> {
        let _ = (account, settings);
        None
    }

    /// Whether [`Platform::refresh_token`] can renew credentials
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Exchange the account's refresh secret for a new token pair
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Refresh` when the provider refuses or the
    /// adapter cannot refresh.
    async fn refresh_token(
        &self,
        account: &Account,
    ) -> std::result::Result<TokenPair, PlatformError> {
        let _ = account;
        Err(PlatformError::Refresh(format!(
            "{} does not support token refresh",
            self.provider().display_name()
        )))
    }
}

/// Resolve a per-account option from request settings first, then account metadata
pub(crate) fn setting<'a>(
    account: &'a Account,
    settings: &'a AccountSettings,
    key: &str,
) -> Option<&'a str> {
    settings
        .get(key)
        .or_else(|| account.metadata.get(key))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// First non-empty line of the post, cut to `limit` characters
pub(crate) fn title_from(content: &str, limit: usize) -> Option<String> {
    let line = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() <= limit {
        return Some(line.to_string());
    }
    let cut: String = line.chars().take(limit.saturating_sub(3)).collect();
    Some(format!("{}...", cut.trim_end()))
}

/// Adapters available to the dispatcher, keyed by provider
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    adapters: HashMap<Provider, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same provider
    pub fn register(&mut self, platform: Arc<dyn Platform>) -> &mut Self {
        self.adapters.insert(platform.provider(), platform);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn Platform>> {
        self.adapters.get(&provider).cloned()
    }

    /// Registered providers in a stable order
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Build HTTP adapters for every provider section present in `config`
    ///
    /// All adapters share one `reqwest::Client` carrying the configured
    /// per-call timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.dispatch.http_timeout())
            .user_agent(format!("fanpost/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;

        let media_host: Option<Arc<dyn media_host::MediaHost>> = config
            .media_host
            .as_ref()
            .map(|c| Arc::new(media_host::HttpMediaHost::new(c, http.clone())) as _);

        let mut registry = Self::new();

        if let Some(reddit) = &config.reddit {
            registry.register(Arc::new(reddit::RedditPlatform::from_config(
                reddit,
                media_host.clone(),
                http.clone(),
            )));
        }
        if let Some(twitter) = &config.twitter {
            registry.register(Arc::new(twitter::TwitterPlatform::from_config(
                twitter,
                http.clone(),
            )));
        }
        if let Some(youtube) = &config.youtube {
            registry.register(Arc::new(youtube::YouTubePlatform::from_config(
                youtube,
                http.clone(),
            )));
        }
        if let Some(telegram) = &config.telegram {
            registry.register(Arc::new(telegram::TelegramPlatform::new(
                telegram.api_base.clone(),
                http.clone(),
            )));
        }
        if let Some(mastodon) = &config.mastodon {
            registry.register(Arc::new(mastodon::MastodonPlatform::new(
                mastodon.default_instance.clone(),
            )));
        }

        if registry.is_empty() {
            tracing::warn!(
                "No provider sections are configured; every account will be unsupported"
            );
        } else {
            tracing::debug!("Registered {} provider adapter(s)", registry.len());
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockPlatform;
    use super::*;
    use crate::config::{OAuthAppConfig, RedditConfig};

    #[test]
    fn test_register_replaces_same_provider() {
        let mut registry = PlatformRegistry::new();
        registry.register(Arc::new(MockPlatform::success(Provider::Reddit)));
        registry.register(Arc::new(MockPlatform::post_failure(Provider::Reddit, "nope")));
        registry.register(Arc::new(MockPlatform::success(Provider::Twitter)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.providers(), vec![Provider::Reddit, Provider::Twitter]);
        assert!(registry.get(Provider::Youtube).is_none());
    }

    #[test]
    fn test_from_config_registers_configured_sections() {
        let mut config = Config::default_config();
        config.reddit = Some(RedditConfig {
            client_id: "id".to_string(),
            client_secret: Some("secret".to_string()),
            user_agent: "fanpost/test".to_string(),
        });
        config.twitter = Some(OAuthAppConfig {
            client_id: "tw".to_string(),
            client_secret: None,
        });

        let registry = PlatformRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.providers(),
            vec![
                Provider::Reddit,
                Provider::Twitter,
                Provider::Mastodon,
                Provider::Telegram
            ]
        );
        assert!(registry.get(Provider::Twitter).unwrap().supports_refresh());
        assert!(!registry.get(Provider::Telegram).unwrap().supports_refresh());
    }

    #[test]
    fn test_setting_prefers_request_over_metadata() {
        let account = Account::new("a1", "u1", Provider::Reddit, "alice", "t")
            .with_metadata("subreddit", "from_metadata");
        let mut settings = AccountSettings::new();
        assert_eq!(setting(&account, &settings, "subreddit"), Some("from_metadata"));

        settings.insert("subreddit".to_string(), "from_request".to_string());
        assert_eq!(setting(&account, &settings, "subreddit"), Some("from_request"));

        settings.insert("subreddit".to_string(), "   ".to_string());
        assert_eq!(setting(&account, &settings, "subreddit"), None);
    }

    #[test]
    fn test_title_from_first_line() {
        assert_eq!(title_from("\n  Hello world \nbody", 300).as_deref(), Some("Hello world"));
        assert_eq!(title_from("   \n", 300), None);

        let long = "x".repeat(120);
        let title = title_from(&long, 100).unwrap();
        assert_eq!(title.chars().count(), 100);
        assert!(title.ends_with("..."));
    }
}

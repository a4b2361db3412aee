//! Mock platform implementation for testing
//!
//! A configurable adapter that can simulate successes, provider rejections,
//! expired credentials, panics and slow providers without network access.
//! Publish and refresh calls are counted so the refresh-and-retry policy can
//! be asserted exactly.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PlatformError;
use crate::platforms::Platform;
use crate::types::{
    Account, AccountSettings, Delivery, MediaItem, Provider, Published, TokenPair,
};

/// What `publish` does on each call
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Always succeed
    Succeed,
    /// Always fail with this error
    Fail(PlatformError),
    /// Refuse the access secret on every call
    RejectCredentials,
    /// Refuse the access secret until it has been refreshed
    ExpiredUntilRefresh,
    /// Panic inside publish
    Panic,
}

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub provider: Provider,

    pub behavior: MockBehavior,

    /// Whether the adapter advertises refresh support
    pub supports_refresh: bool,

    /// Error returned by `refresh_token`, if it should fail
    pub refresh_error: Option<String>,

    /// Delay before completing publish (simulates network latency)
    pub delay: Duration,

    pub character_limit: Option<usize>,

    /// Sub-channel reported for every account
    pub channel: Option<String>,

    pub publish_call_count: Arc<Mutex<usize>>,

    pub refresh_call_count: Arc<Mutex<usize>>,

    /// Access secret presented on each publish call, in order
    pub tokens_seen: Arc<Mutex<Vec<String>>>,

    /// Content of every successful publish
    pub posted_content: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Reddit,
            behavior: MockBehavior::Succeed,
            supports_refresh: true,
            refresh_error: None,
            delay: Duration::from_millis(0),
            character_limit: None,
            channel: None,
            publish_call_count: Arc::new(Mutex::new(0)),
            refresh_call_count: Arc::new(Mutex::new(0)),
            tokens_seen: Arc::new(Mutex::new(Vec::new())),
            posted_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub const REFRESHED_ACCESS: &str = "mock-refreshed-access";
pub const REFRESHED_REFRESH: &str = "mock-refreshed-refresh";

/// Mock platform for testing
///
/// Cloning shares the call counters, so a test can keep a handle while the
/// registry owns another.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A mock platform that always succeeds
    pub fn success(provider: Provider) -> Self {
        Self::new(MockConfig {
            provider,
            ..Default::default()
        })
    }

    /// A mock platform whose publish fails with `PlatformError::Posting`
    pub fn post_failure(provider: Provider, error: &str) -> Self {
        Self::failing(provider, PlatformError::Posting(error.to_string()))
    }

    /// A mock platform whose publish fails with the given error
    pub fn failing(provider: Provider, error: PlatformError) -> Self {
        Self::new(MockConfig {
            provider,
            behavior: MockBehavior::Fail(error),
            ..Default::default()
        })
    }

    /// A mock platform that refuses credentials on every call
    pub fn auth_failure(provider: Provider) -> Self {
        Self::new(MockConfig {
            provider,
            behavior: MockBehavior::RejectCredentials,
            ..Default::default()
        })
    }

    /// A mock platform whose token expired mid-session; one refresh fixes it
    pub fn expired_token(provider: Provider) -> Self {
        Self::new(MockConfig {
            provider,
            behavior: MockBehavior::ExpiredUntilRefresh,
            ..Default::default()
        })
    }

    /// A mock platform that panics while publishing
    pub fn panicking(provider: Provider) -> Self {
        Self::new(MockConfig {
            provider,
            behavior: MockBehavior::Panic,
            ..Default::default()
        })
    }

    /// A mock platform that succeeds after a delay
    pub fn with_delay(provider: Provider, delay: Duration) -> Self {
        Self::new(MockConfig {
            provider,
            delay,
            ..Default::default()
        })
    }

    /// A mock platform with a character limit
    pub fn with_limit(provider: Provider, limit: usize) -> Self {
        Self::new(MockConfig {
            provider,
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn without_refresh(mut self) -> Self {
        self.config.supports_refresh = false;
        self
    }

    pub fn with_refresh_error(mut self, error: &str) -> Self {
        self.config.refresh_error = Some(error.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.config.channel = Some(channel.to_string());
        self
    }

    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    pub fn refresh_call_count(&self) -> usize {
        *self.config.refresh_call_count.lock().unwrap()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.config.tokens_seen.lock().unwrap().clone()
    }

    pub fn posted_content(&self) -> Vec<String> {
        self.config.posted_content.lock().unwrap().clone()
    }

    fn succeed(&self, account: &Account, content: &str, media: &[MediaItem]) -> Published {
        self.config
            .posted_content
            .lock()
            .unwrap()
            .push(content.to_string());

        let post_id = format!("{}:mock-{}", self.config.provider, uuid::Uuid::new_v4());
        let delivery = if media.is_empty() {
            Delivery::Text
        } else {
            Delivery::Native
        };
        let mut published = Published::new(post_id.clone(), delivery)
            .with_url(format!("https://mock.invalid/{}/{}", account.username, post_id));
        if let Some(channel) = &self.config.channel {
            published = published.with_channel(channel.clone());
        }
        published
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn provider(&self) -> Provider {
        self.config.provider
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    async fn publish(
        &self,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        _settings: &AccountSettings,
    ) -> Result<Published, PlatformError> {
        *self.config.publish_call_count.lock().unwrap() += 1;
        self.config
            .tokens_seen
            .lock()
            .unwrap()
            .push(account.access_token().to_string());

        self.validate(content, media)?;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        match &self.config.behavior {
            MockBehavior::Succeed => Ok(self.succeed(account, content, media)),
            MockBehavior::Fail(error) => Err(error.clone()),
            MockBehavior::RejectCredentials => Err(PlatformError::Authentication(
                "Mock provider rejected the access token".to_string(),
            )),
            MockBehavior::ExpiredUntilRefresh => {
                if account.access_token() == REFRESHED_ACCESS {
                    Ok(self.succeed(account, content, media))
                } else {
                    Err(PlatformError::Authentication(
                        "Mock access token expired".to_string(),
                    ))
                }
            }
            MockBehavior::Panic => panic!("mock adapter blew up for {}", account.id),
        }
    }

    fn channel(&self, _account: &Account, _settings: &AccountSettings) -> Option<String> {
        self.config.channel.clone()
    }

    fn supports_refresh(&self) -> bool {
        self.config.supports_refresh
    }

    async fn refresh_token(&self, _account: &Account) -> Result<TokenPair, PlatformError> {
        *self.config.refresh_call_count.lock().unwrap() += 1;

        match &self.config.refresh_error {
            Some(error) => Err(PlatformError::Refresh(error.clone())),
            None => Ok(TokenPair::new(
                REFRESHED_ACCESS,
                Some(REFRESHED_REFRESH.to_string()),
            )),
        }
    }
}

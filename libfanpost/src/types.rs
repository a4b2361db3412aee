//! Core types for Fanpost

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::media::RawMedia;

/// Third-party platforms an account can be linked to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Reddit,
    Twitter,
    Mastodon,
    Telegram,
    Youtube,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Reddit,
        Provider::Twitter,
        Provider::Mastodon,
        Provider::Telegram,
        Provider::Youtube,
    ];

    /// Lowercase identifier used in storage and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::Twitter => "twitter",
            Self::Mastodon => "mastodon",
            Self::Telegram => "telegram",
            Self::Youtube => "youtube",
        }
    }

    /// Human-readable name for messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Reddit => "Reddit",
            Self::Twitter => "Twitter",
            Self::Mastodon => "Mastodon",
            Self::Telegram => "Telegram",
            Self::Youtube => "YouTube",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reddit" => Ok(Self::Reddit),
            "twitter" | "x" => Ok(Self::Twitter),
            "mastodon" => Ok(Self::Mastodon),
            "telegram" => Ok(Self::Telegram),
            "youtube" => Ok(Self::Youtube),
            _ => Err(format!(
                "Unknown provider: '{}'. Valid options: reddit, twitter, mastodon, telegram, youtube",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "connected" => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// A linked provider account owned by a user
///
/// Secrets stay wrapped in [`SecretString`] and are only exposed when an
/// adapter builds a request.
#[derive(Debug)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub username: String,
    pub display_name: Option<String>,
    pub access_secret: SecretString,
    pub refresh_secret: Option<SecretString>,
    pub connection_state: ConnectionState,
    /// Provider-specific key-value data, e.g. a selected subreddit
    pub metadata: HashMap<String, String>,
}

impl Account {
    /// Create a connected account with no refresh secret or metadata
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        provider: Provider,
        username: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            provider,
            username: username.into(),
            display_name: None,
            access_secret: SecretString::from(access_secret.into()),
            refresh_secret: None,
            connection_state: ConnectionState::Connected,
            metadata: HashMap::new(),
        }
    }

    pub fn with_refresh_secret(mut self, refresh_secret: impl Into<String>) -> Self {
        self.refresh_secret = Some(SecretString::from(refresh_secret.into()));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connection_state = ConnectionState::Disconnected;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Name used when reporting outcomes
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    pub fn access_token(&self) -> &str {
        self.access_secret.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_secret.as_ref().map(|s| s.expose_secret())
    }

    pub fn has_refresh_secret(&self) -> bool {
        self.refresh_token().is_some_and(|token| !token.is_empty())
    }

    /// Copy of this account carrying a refreshed token pair
    ///
    /// A missing new refresh secret keeps the existing one.
    pub fn with_tokens(&self, tokens: &TokenPair) -> Self {
        let mut account = self.clone();
        account.access_secret = SecretString::from(tokens.access_token().to_string());
        if let Some(refresh) = tokens.refresh_token() {
            account.refresh_secret = Some(SecretString::from(refresh.to_string()));
        }
        account
    }
}

impl Clone for Account {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            provider: self.provider,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            access_secret: SecretString::from(self.access_token().to_string()),
            refresh_secret: self
                .refresh_token()
                .map(|s| SecretString::from(s.to_string())),
            connection_state: self.connection_state,
            metadata: self.metadata.clone(),
        }
    }
}

/// Access/refresh pair returned by a provider refresh endpoint
#[derive(Debug)]
pub struct TokenPair {
    access: SecretString,
    refresh: Option<SecretString>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: SecretString::from(access.into()),
            refresh: refresh.map(SecretString::from),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh.as_ref().map(|s| s.expose_secret())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let lower = mime_type.to_ascii_lowercase();
        if lower.starts_with("image/") {
            Some(Self::Image)
        } else if lower.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// A validated media payload
///
/// The byte buffer is reference counted, so cloning an item never copies the
/// media itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub name: String,
    pub mime_type: String,
    pub kind: MediaKind,
    pub data: Bytes,
}

impl MediaItem {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }
}

/// Provider-specific settings for one account, e.g. `subreddit` or `chat_id`
pub type AccountSettings = HashMap<String, String>;

/// A single logical publish operation
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub content: String,
    pub media: Vec<RawMedia>,
    /// Target account ids; duplicates are ignored
    pub target_accounts: Vec<String>,
    /// Settings keyed by account id
    pub settings: HashMap<String, AccountSettings>,
}

impl PublishRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn to_accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_accounts
            .extend(accounts.into_iter().map(Into::into));
        self
    }

    pub fn with_media(mut self, media: RawMedia) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_setting(
        mut self,
        account_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.settings
            .entry(account_id.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// How a successful post reached the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Text-only post
    Text,
    /// Media uploaded to the provider's own storage
    Native,
    /// Link post pointing at an external media host
    ExternalLink,
    /// Text post describing media that could not be uploaded
    TextReference,
}

/// Classification of a failed outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ContentRejected,
    Transient,
    Reconnect,
    Unsupported,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::ContentRejected => "content_rejected",
            Self::Transient => "transient",
            Self::Reconnect => "reconnect",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// What an adapter reports for a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub post_id: String,
    pub url: Option<String>,
    pub delivery: Delivery,
    /// Sub-channel the post landed in, e.g. a subreddit
    pub channel: Option<String>,
    /// Extra detail for the user, e.g. why a fallback was used
    pub note: Option<String>,
}

impl Published {
    pub fn new(post_id: impl Into<String>, delivery: Delivery) -> Self {
        Self {
            post_id: post_id.into(),
            url: None,
            delivery,
            channel: None,
            note: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of publishing to one account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishOutcome {
    pub account_id: String,
    pub provider: Provider,
    pub account_name: String,
    pub success: bool,
    pub post_id: Option<String>,
    pub url: Option<String>,
    pub delivery: Option<Delivery>,
    pub channel: Option<String>,
    /// Informational note on success, diagnostic on failure
    pub message: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub error: Option<String>,
    pub requires_reconnect: bool,
    /// Number of adapter publish calls made (at most 2)
    pub attempts: u8,
    /// Whether credentials were refreshed during this dispatch
    pub refreshed: bool,
}

impl PublishOutcome {
    pub fn published(account: &Account, published: Published) -> Self {
        Self {
            account_id: account.id.clone(),
            provider: account.provider,
            account_name: account.label().to_string(),
            success: true,
            post_id: Some(published.post_id),
            url: published.url,
            delivery: Some(published.delivery),
            channel: published.channel,
            message: published.note,
            error_kind: None,
            error: None,
            requires_reconnect: false,
            attempts: 1,
            refreshed: false,
        }
    }

    pub fn failed(account: &Account, error: &PlatformError) -> Self {
        let kind = error.failure_kind();
        Self {
            account_id: account.id.clone(),
            provider: account.provider,
            account_name: account.label().to_string(),
            success: false,
            post_id: None,
            url: None,
            delivery: None,
            channel: None,
            message: None,
            error_kind: Some(kind),
            error: Some(error.to_string()),
            requires_reconnect: kind == FailureKind::Reconnect,
            attempts: 1,
            refreshed: false,
        }
    }

    /// Failure that did not come from the provider itself
    pub fn failed_with(account: &Account, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            account_id: account.id.clone(),
            provider: account.provider,
            account_name: account.label().to_string(),
            success: false,
            post_id: None,
            url: None,
            delivery: None,
            channel: None,
            message: None,
            error_kind: Some(kind),
            error: Some(error.into()),
            requires_reconnect: kind == FailureKind::Reconnect,
            attempts: 0,
            refreshed: false,
        }
    }

    /// Terminal auth failure with a reconnect instruction for the user
    pub fn reconnect(account: &Account, reason: &str) -> Self {
        let mut outcome = Self::failed_with(
            account,
            FailureKind::Reconnect,
            format!(
                "{} account '{}' needs to be reconnected: {}. Please reconnect the account and try again.",
                account.provider.display_name(),
                account.label(),
                reason
            ),
        );
        outcome.attempts = 1;
        outcome
    }

    pub fn with_attempts(mut self, attempts: u8, refreshed: bool) -> Self {
        self.attempts = attempts;
        self.refreshed = refreshed;
        self
    }
}

/// Aggregated view over every account in one dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// True when at least one account succeeded
    pub success: bool,
    pub message: String,
    /// Outcomes keyed by account id
    pub outcomes: BTreeMap<String, PublishOutcome>,
}

impl AggregateResult {
    pub fn from_outcomes(outcomes: Vec<PublishOutcome>) -> Self {
        let outcomes: BTreeMap<String, PublishOutcome> = outcomes
            .into_iter()
            .map(|o| (o.account_id.clone(), o))
            .collect();

        let total = outcomes.len();
        let successful = outcomes.values().filter(|o| o.success).count();
        let failed = total - successful;

        Self {
            total,
            successful,
            failed,
            success: successful > 0,
            message: summary_message(total, successful, failed),
            outcomes,
        }
    }

    /// True when nothing succeeded and every failure needs the user to relink
    pub fn all_require_reconnect(&self) -> bool {
        self.successful == 0
            && !self.outcomes.is_empty()
            && self.outcomes.values().all(|o| o.requires_reconnect)
    }
}

fn summary_message(total: usize, successful: usize, failed: usize) -> String {
    let noun = |n: usize| if n == 1 { "account" } else { "accounts" };

    if failed == 0 {
        if total == 1 {
            "Post published to 1 account.".to_string()
        } else {
            format!("Post published to all {} accounts.", total)
        }
    } else if successful == 0 {
        if total == 1 {
            "Failed to publish to 1 account.".to_string()
        } else {
            format!("Failed to publish to all {} accounts.", total)
        }
    } else {
        format!(
            "Post published to {} of {} {}. {} failed.",
            successful,
            total,
            noun(total),
            failed
        )
    }
}

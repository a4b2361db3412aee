//! Error types for Fanpost

use thiserror::Error;

use crate::types::FailureKind;

pub type Result<T> = std::result::Result<T, FanpostError>;

#[derive(Error, Debug)]
pub enum FanpostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl FanpostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FanpostError::Validation(_) => 3,
            FanpostError::Platform(PlatformError::Authentication(_))
            | FanpostError::Platform(PlatformError::Reconnect(_)) => 2,
            FanpostError::Platform(_) => 1,
            FanpostError::Config(_) => 1,
            FanpostError::Database(_) => 1,
            FanpostError::Credential(_) => 1,
        }
    }

    /// True for errors that reject the whole dispatch before any provider is contacted
    pub fn is_validation(&self) -> bool {
        matches!(self, FanpostError::Validation(_))
    }
}

/// Request-level validation failures.
///
/// These reject a dispatch as a whole; they are never folded into a
/// per-account outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No target accounts selected")]
    NoAccountsSelected,

    #[error("Post must have content or at least one media item")]
    EmptyPost,

    #[error("None of the selected accounts are connected")]
    NoValidAccounts,

    #[error("Media '{name}' is {size} bytes, exceeding the {limit} byte limit for its type")]
    MediaTooLarge { name: String, size: u64, limit: u64 },

    #[error("Media '{name}' has unsupported type '{mime_type}'")]
    UnsupportedMedia { name: String, mime_type: String },

    #[error("Media '{name}' could not be decoded: {reason}")]
    MediaDecode { name: String, reason: String },

    #[error("Media '{name}' is empty")]
    EmptyMedia { name: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Account {account_id} not found for user {user_id}")]
    NotFound { account_id: String, user_id: String },

    #[error("Credential store unavailable: {0}")]
    Store(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Credentials were rejected; a token refresh may resolve it
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credentials are unusable and the user must relink the account
    #[error("Reconnect required: {0}")]
    Reconnect(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Content rejected: {0}")]
    Rejected(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Media upload failed: {0}")]
    MediaUpload(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),
}

impl PlatformError {
    /// Classification recorded on a failed outcome
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PlatformError::Authentication(_)
            | PlatformError::Reconnect(_)
            | PlatformError::Refresh(_) => FailureKind::Reconnect,
            PlatformError::Validation(_) => FailureKind::Validation,
            PlatformError::Rejected(_) => FailureKind::ContentRejected,
            PlatformError::Network(_)
            | PlatformError::RateLimit(_)
            | PlatformError::MediaUpload(_)
            | PlatformError::Posting(_) => FailureKind::Transient,
        }
    }

    /// The message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            PlatformError::Authentication(m)
            | PlatformError::Reconnect(m)
            | PlatformError::Validation(m)
            | PlatformError::Rejected(m)
            | PlatformError::Posting(m)
            | PlatformError::Network(m)
            | PlatformError::RateLimit(m)
            | PlatformError::MediaUpload(m)
            | PlatformError::Refresh(m) => m,
        }
    }

    /// Classify an HTTP status returned by a provider API
    ///
    /// 401 is an auth failure. 400/403/422 are content rejections carrying
    /// the provider body verbatim; adapters whose provider also uses 403 for
    /// scopes or quotas reclassify it from the body before calling this.
    /// 429 is a rate limit and 5xx a transient fault.
    pub fn from_status(provider: &str, status: u16, context: &str, body: &str) -> Self {
        let body = body.trim();
        match status {
            401 => PlatformError::Authentication(format!(
                "{} rejected credentials ({}): HTTP {} {}",
                provider, context, status, body
            )),
            403 => PlatformError::Rejected(format!(
                "{} refused the request ({}): {}",
                provider, context, body
            )),
            400 | 409 | 413 | 422 => PlatformError::Rejected(format!(
                "{} declined the request ({}): {}",
                provider, context, body
            )),
            429 => PlatformError::RateLimit(format!(
                "{} rate limit exceeded ({}): {}",
                provider, context, body
            )),
            500..=599 => PlatformError::Network(format!(
                "{} server error ({}): HTTP {} {}",
                provider, context, status, body
            )),
            _ => PlatformError::Posting(format!(
                "{} returned HTTP {} ({}): {}",
                provider, status, context, body
            )),
        }
    }

    /// Map a transport-level reqwest failure
    pub fn from_transport(provider: &str, context: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            PlatformError::Network(format!("{} request timed out ({})", provider, context))
        } else if error.is_decode() {
            PlatformError::Posting(format!(
                "{} returned an unreadable response ({}): {}",
                provider, context, error
            ))
        } else {
            PlatformError::Network(format!("{} request failed ({}): {}", provider, context, error))
        }
    }
}

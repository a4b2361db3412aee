//! Fanpost - publish once to every linked account
//!
//! This library holds the dispatch engine: it resolves a user's target
//! accounts, publishes to each provider concurrently, refreshes expired
//! credentials once, and reduces every per-account outcome into one result.

pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod media;
pub mod oauth;
pub mod platforms;
pub mod resilience;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use db::Database;
pub use dispatch::Dispatcher;
pub use error::{FanpostError, PlatformError, Result, ValidationError};
pub use media::{MediaLimits, MediaNormalizer, RawMedia};
pub use platforms::{Platform, PlatformRegistry};
pub use tracker::{MemoryTracker, NoopTracker, PostTracker};
pub use types::{
    Account, AggregateResult, Delivery, FailureKind, MediaItem, Provider, PublishOutcome,
    PublishRequest,
};

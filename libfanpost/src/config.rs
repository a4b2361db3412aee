//! Configuration management for Fanpost

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::media::{MAX_IMAGE_BYTES, MAX_VIDEO_BYTES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub media: MediaConfig,
    pub reddit: Option<RedditConfig>,
    pub twitter: Option<OAuthAppConfig>,
    pub youtube: Option<OAuthAppConfig>,
    pub telegram: Option<TelegramConfig>,
    pub mastodon: Option<MastodonConfig>,
    pub media_host: Option<MediaHostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Timeout applied by adapters to every provider call
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Upper bound on the best-effort tracker write
    #[serde(default = "default_tracker_timeout_secs")]
    pub tracker_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            tracker_timeout_secs: default_tracker_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: MAX_IMAGE_BYTES,
            max_video_bytes: MAX_VIDEO_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// OAuth application registration used for token refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MastodonConfig {
    /// Instance used when an account carries no `instance` metadata
    #[serde(default)]
    pub default_instance: Option<String>,
}

/// Generic external media host used as a fallback for native uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaHostConfig {
    pub upload_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_tracker_timeout_secs() -> u64 {
    5
}

fn default_max_image_bytes() -> u64 {
    MAX_IMAGE_BYTES
}

fn default_max_video_bytes() -> u64 {
    MAX_VIDEO_BYTES
}

fn default_user_agent() -> String {
    format!("fanpost/{}", env!("CARGO_PKG_VERSION"))
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/fanpost/fanpost.db".to_string(),
            },
            dispatch: DispatchConfig::default(),
            media: MediaConfig::default(),
            reddit: None,
            twitter: None,
            youtube: None,
            telegram: Some(TelegramConfig {
                api_base: default_telegram_api_base(),
            }),
            mastodon: Some(MastodonConfig::default()),
            media_host: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.dispatch.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.http_timeout_secs must be greater than zero".to_string(),
            )
            .into());
        }
        if self.media.max_image_bytes == 0 || self.media.max_video_bytes == 0 {
            return Err(
                ConfigError::Invalid("media size limits must be greater than zero".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FANPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("fanpost").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("fanpost"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_dir, path) = write_config(
            r#"
            [database]
            path = "/tmp/fanpost.db"
            "#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.dispatch.http_timeout_secs, 30);
        assert_eq!(config.dispatch.tracker_timeout(), Duration::from_secs(5));
        assert_eq!(config.media.max_image_bytes, MAX_IMAGE_BYTES);
        assert_eq!(config.media.max_video_bytes, MAX_VIDEO_BYTES);
        assert!(config.reddit.is_none());
        assert!(config.twitter.is_none());
    }

    #[test]
    fn test_full_config_parses_provider_sections() {
        let (_dir, path) = write_config(
            r#"
            [database]
            path = "/tmp/fanpost.db"

            [dispatch]
            http_timeout_secs = 10

            [reddit]
            client_id = "reddit-app"
            client_secret = "reddit-secret"

            [twitter]
            client_id = "twitter-app"

            [telegram]

            [media_host]
            upload_url = "https://media.example/upload"
            "#,
        );

        let config = Config::load_from_path(&path).unwrap();
        let reddit = config.reddit.unwrap();
        assert_eq!(reddit.client_id, "reddit-app");
        assert!(reddit.user_agent.starts_with("fanpost/"));
        assert_eq!(config.twitter.unwrap().client_secret, None);
        assert_eq!(
            config.telegram.unwrap().api_base,
            "https://api.telegram.org"
        );
        assert_eq!(
            config.media_host.unwrap().upload_url,
            "https://media.example/upload"
        );
        assert_eq!(config.dispatch.http_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (_dir, path) = write_config(
            r#"
            [database]
            path = "/tmp/fanpost.db"

            [dispatch]
            http_timeout_secs = 0
            "#,
        );

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("http_timeout_secs"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::load_from_path(&PathBuf::from("/nonexistent/fanpost.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let (_dir, path) = write_config("[database\npath = ");
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var("FANPOST_CONFIG", "/tmp/custom-fanpost.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("FANPOST_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/custom-fanpost.toml"));
    }

    #[test]
    #[serial]
    fn test_config_path_default_location() {
        std::env::remove_var("FANPOST_CONFIG");
        if let Ok(path) = resolve_config_path() {
            assert!(path.ends_with("fanpost/config.toml"));
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert!(config.telegram.is_some());
    }
}

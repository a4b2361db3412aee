//! Mastodon platform implementation
//!
//! Uses megalodon, so Pleroma, Akkoma, GoToSocial and other instances that
//! implement the Mastodon API work as well. Each account carries its own
//! instance URL in metadata (`instance`). Mastodon tokens do not expire and
//! have no refresh grant: a rejected token means the account must be relinked.

use async_trait::async_trait;
use megalodon::SNS;
use tracing::debug;

use crate::error::PlatformError;
use crate::platforms::{setting, Platform};
use crate::types::{
    Account, AccountSettings, Delivery, MediaItem, Provider, Published,
};

pub const DEFAULT_CHARACTER_LIMIT: usize = 500;
pub const MAX_ATTACHMENTS: usize = 4;

pub struct MastodonPlatform {
    default_instance: Option<String>,
}

impl MastodonPlatform {
    pub fn new(default_instance: Option<String>) -> Self {
        Self { default_instance }
    }

    /// Instance URL for an account, always with a scheme
    fn instance_url(&self, account: &Account, settings: &AccountSettings) -> Option<String> {
        let instance = setting(account, settings, "instance")
            .map(str::to_string)
            .or_else(|| self.default_instance.clone())?;
        let instance = instance.trim_end_matches('/');
        if instance.starts_with("http://") || instance.starts_with("https://") {
            Some(instance.to_string())
        } else {
            Some(format!("https://{}", instance))
        }
    }

    /// Per-account limit from metadata `max_characters`, else 500
    fn limit_for(account: &Account) -> usize {
        account
            .metadata
            .get("max_characters")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHARACTER_LIMIT)
    }

    fn check(content: &str, media: &[MediaItem], limit: usize) -> Result<(), PlatformError> {
        let count = content.chars().count();
        if count > limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Mastodon's {} character limit (current: {} characters)",
                limit, count
            )));
        }
        if media.len() > MAX_ATTACHMENTS {
            return Err(PlatformError::Validation(format!(
                "Mastodon accepts at most {} attachments per post (got {})",
                MAX_ATTACHMENTS,
                media.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MastodonPlatform {
    fn provider(&self) -> Provider {
        Provider::Mastodon
    }

    fn character_limit(&self) -> Option<usize> {
        Some(DEFAULT_CHARACTER_LIMIT)
    }

    fn validate(&self, content: &str, media: &[MediaItem]) -> Result<(), PlatformError> {
        Self::check(content, media, DEFAULT_CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        settings: &AccountSettings,
    ) -> Result<Published, PlatformError> {
        Self::check(content, media, Self::limit_for(account))?;

        let instance_url = self.instance_url(account, settings).ok_or_else(|| {
            PlatformError::Reconnect(
                "Mastodon account has no instance URL; link it again to record one".to_string(),
            )
        })?;

        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(account.access_token().to_string()),
            None,
        )
        .map_err(|e| {
            PlatformError::Network(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        let mut media_ids = Vec::with_capacity(media.len());
        for item in media {
            let reader = std::io::Cursor::new(item.data.clone());
            let response = client
                .upload_media_reader(Box::new(reader), None)
                .await
                .map_err(|e| map_megalodon_error(e, "upload media"))?;
            let id = match response.json {
                megalodon::entities::UploadMedia::Attachment(attachment) => attachment.id,
                megalodon::entities::UploadMedia::AsyncAttachment(attachment) => attachment.id,
            };
            debug!("Uploaded {} to {} as media {}", item.name, instance_url, id);
            media_ids.push(id);
        }

        let options = megalodon::megalodon::PostStatusInputOptions {
            media_ids: if media_ids.is_empty() {
                None
            } else {
                Some(media_ids.clone())
            },
            ..Default::default()
        };

        let response = client
            .post_status(content.to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let (post_id, url) = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => (status.id, status.url),
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => {
                (scheduled.id, None)
            }
        };

        let delivery = if media_ids.is_empty() {
            Delivery::Text
        } else {
            Delivery::Native
        };
        let mut published = Published::new(post_id, delivery).with_channel(instance_url);
        if let Some(url) = url {
            published = published.with_url(url);
        }
        Ok(published)
    }

    fn channel(&self, account: &Account, settings: &AccountSettings) -> Option<String> {
        self.instance_url(account, settings)
    }
}

/// Map megalodon errors to PlatformError
///
/// - HTTP 401/403 → `Reconnect` (Mastodon has no refresh grant)
/// - HTTP 422 → `Rejected` (instance declined the content)
/// - HTTP 429 → `RateLimit`
/// - HTTP 5xx → `Network`
/// - Parse errors → `Posting`
/// - Anything else → `Network`
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => PlatformError::Reconnect(format!(
            "Mastodon rejected the access token ({}): {}",
            context, error_str
        )),
        Some(422) => PlatformError::Rejected(format!(
            "Mastodon declined the post ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Posting(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None => {
            if error_lower.contains("unauthorized") || error_lower.contains("forbidden") {
                PlatformError::Reconnect(format!(
                    "Mastodon rejected the access token ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("parse")
                || error_lower.contains("json")
                || error_lower.contains("deserialize")
            {
                PlatformError::Posting(format!(
                    "Mastodon response parse error ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                PlatformError::RateLimit(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else {
                PlatformError::Network(format!("Mastodon error ({}): {}", context, error_str))
            }
        }
    }
}

/// Pull an HTTP status out of an error message
///
/// Looks for "HTTP 401", "status 403", "code: 422" and bare codes followed by
/// a colon or space.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let is_code = window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if !is_code {
            continue;
        }
        if let Some(code) = std::str::from_utf8(&window[..3])
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            if (100..=599).contains(&code) {
                return Some(code);
            }
        }
    }

    None
}

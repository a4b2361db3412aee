//! Telegram platform implementation
//!
//! Accounts are bots: the access secret is the bot token and the target chat
//! comes from the `chat_id` setting or account metadata. Bot tokens never
//! expire, so a 401 means the token was revoked.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::PlatformError;
use crate::platforms::{setting, Platform};
use crate::types::{Account, AccountSettings, Delivery, MediaItem, Provider, Published};

pub const TEXT_LIMIT: usize = 4096;
pub const CAPTION_LIMIT: usize = 1024;
pub const MAX_GROUP_ITEMS: usize = 10;

pub struct TelegramPlatform {
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<serde_json::Value>,
    description: Option<String>,
    error_code: Option<u16>,
}

impl TelegramPlatform {
    pub fn new(api_base: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn method_url(&self, token: &SecretString, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token.expose_secret(), method)
    }

    fn chat_id<'a>(
        account: &'a Account,
        settings: &'a AccountSettings,
    ) -> Result<&'a str, PlatformError> {
        setting(account, settings, "chat_id").ok_or_else(|| {
            PlatformError::Validation(
                "Telegram needs a chat_id setting or a linked chat to post to".to_string(),
            )
        })
    }

    async fn call(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
    ) -> Result<serde_json::Value, PlatformError> {
        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Telegram", method, &e.without_url()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::from_transport("Telegram", method, &e.without_url()))?;
        interpret(method, status, &body)
    }

    fn media_part(item: &MediaItem) -> Result<reqwest::multipart::Part, PlatformError> {
        reqwest::multipart::Part::stream(item.data.clone())
            .file_name(item.name.clone())
            .mime_str(&item.mime_type)
            .map_err(|e| PlatformError::MediaUpload(format!("Invalid media type: {}", e)))
    }
}

/// Turn a Bot API response into its `result` or a classified error
fn interpret(method: &str, status: u16, body: &str) -> Result<serde_json::Value, PlatformError> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();

    match parsed {
        Some(ApiResponse {
            ok: true,
            result: Some(result),
            ..
        }) => Ok(result),
        Some(response) => {
            let code = response.error_code.unwrap_or(status);
            let description = response
                .description
                .unwrap_or_else(|| "no description".to_string());
            Err(match code {
                401 | 404 => PlatformError::Reconnect(format!(
                    "Telegram bot token was rejected ({}): {}",
                    method, description
                )),
                // Bot removed from the chat or blocked by the user
                403 => PlatformError::Rejected(format!(
                    "Telegram refused the message ({}): {}",
                    method, description
                )),
                _ => PlatformError::from_status("Telegram", code, method, &description),
            })
        }
        None => Err(PlatformError::from_status("Telegram", status, method, body)),
    }
}

/// Message id of the first message in a send result
fn message_id(result: &serde_json::Value) -> Option<i64> {
    let message = result.as_array().and_then(|a| a.first()).unwrap_or(result);
    message.get("message_id").and_then(|v| v.as_i64())
}

/// Public link for a message in a channel or public group
fn message_url(chat_id: &str, message_id: i64) -> Option<String> {
    chat_id
        .strip_prefix('@')
        .map(|name| format!("https://t.me/{}/{}", name, message_id))
}

#[async_trait]
impl Platform for TelegramPlatform {
    fn provider(&self) -> Provider {
        Provider::Telegram
    }

    fn character_limit(&self) -> Option<usize> {
        Some(TEXT_LIMIT)
    }

    fn validate(&self, content: &str, media: &[MediaItem]) -> Result<(), PlatformError> {
        let count = content.chars().count();
        let (limit, what) = if media.is_empty() {
            (TEXT_LIMIT, "message")
        } else {
            (CAPTION_LIMIT, "caption")
        };
        if count > limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Telegram's {} character {} limit (current: {} characters)",
                limit, what, count
            )));
        }
        if media.len() > MAX_GROUP_ITEMS {
            return Err(PlatformError::Validation(format!(
                "Telegram albums hold at most {} items (got {})",
                MAX_GROUP_ITEMS,
                media.len()
            )));
        }
        Ok(())
    }

    async fn publish(
        &self,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        settings: &AccountSettings,
    ) -> Result<Published, PlatformError> {
        self.validate(content, media)?;
        let chat_id = Self::chat_id(account, settings)?;
        let token = &account.access_secret;

        let result = match media {
            [] => {
                let request = self
                    .http
                    .post(self.method_url(token, "sendMessage"))
                    .json(&json!({ "chat_id": chat_id, "text": content }));
                self.call(request, "sendMessage").await?
            }
            [item] => {
                let (method, field) = if item.is_video() {
                    ("sendVideo", "video")
                } else {
                    ("sendPhoto", "photo")
                };
                let mut form = reqwest::multipart::Form::new()
                    .text("chat_id", chat_id.to_string())
                    .part(field, Self::media_part(item)?);
                if !content.is_empty() {
                    form = form.text("caption", content.to_string());
                }
                let request = self
                    .http
                    .post(self.method_url(token, method))
                    .multipart(form);
                self.call(request, method).await?
            }
            items => {
                let mut group = Vec::with_capacity(items.len());
                let mut form = reqwest::multipart::Form::new().text("chat_id", chat_id.to_string());
                for (index, item) in items.iter().enumerate() {
                    let attach = format!("file{}", index);
                    let kind = if item.is_video() { "video" } else { "photo" };
                    let mut entry = json!({
                        "type": kind,
                        "media": format!("attach://{}", attach),
                    });
                    if index == 0 && !content.is_empty() {
                        entry["caption"] = json!(content);
                    }
                    group.push(entry);
                    form = form.part(attach, Self::media_part(item)?);
                }
                form = form.text("media", serde_json::Value::Array(group).to_string());
                let request = self
                    .http
                    .post(self.method_url(token, "sendMediaGroup"))
                    .multipart(form);
                self.call(request, "sendMediaGroup").await?
            }
        };

        let id = message_id(&result).ok_or_else(|| {
            PlatformError::Posting("Telegram response carried no message id".to_string())
        })?;
        let delivery = if media.is_empty() {
            Delivery::Text
        } else {
            Delivery::Native
        };

        let mut published =
            Published::new(format!("{}:{}", chat_id, id), delivery).with_channel(chat_id);
        if let Some(url) = message_url(chat_id, id) {
            published = published.with_url(url);
        }
        Ok(published)
    }

    fn channel(&self, account: &Account, settings: &AccountSettings) -> Option<String> {
        setting(account, settings, "chat_id").map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaKind;

    fn account() -> Account {
        Account::new("tg1", "u1", Provider::Telegram, "fanpost_bot", "123:ABC")
    }

    fn photo() -> MediaItem {
        MediaItem {
            name: "a.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            kind: MediaKind::Image,
            data: bytes::Bytes::from_static(b"jpg"),
        }
    }

    #[test]
    fn test_caption_limit_applies_with_media() {
        let platform = TelegramPlatform::new("https://api.telegram.org", reqwest::Client::new());
        let text = "a".repeat(2000);
        assert!(platform.validate(&text, &[]).is_ok());

        let err = platform.validate(&text, &[photo()]).unwrap_err();
        assert!(err.message().contains("1024"));
        assert!(err.message().contains("caption"));
    }

    #[tokio::test]
    async fn test_missing_chat_is_validation_error() {
        let platform = TelegramPlatform::new("https://api.telegram.org", reqwest::Client::new());
        let err = platform
            .publish(&account(), "hi", &[], &AccountSettings::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
    }

    #[test]
    fn test_chat_from_metadata() {
        let account = account().with_metadata("chat_id", "@fanpost_news");
        let platform = TelegramPlatform::new("https://api.telegram.org/", reqwest::Client::new());
        assert_eq!(
            platform.channel(&account, &AccountSettings::new()).as_deref(),
            Some("@fanpost_news")
        );
        assert_eq!(platform.api_base, "https://api.telegram.org");
    }

    #[test]
    fn test_interpret_success() {
        let result = interpret(
            "sendMessage",
            200,
            r#"{"ok":true,"result":{"message_id":77,"chat":{"id":-100123}}}"#,
        )
        .unwrap();
        assert_eq!(message_id(&result), Some(77));
    }

    #[test]
    fn test_interpret_media_group_result() {
        let result = interpret(
            "sendMediaGroup",
            200,
            r#"{"ok":true,"result":[{"message_id":10},{"message_id":11}]}"#,
        )
        .unwrap();
        assert_eq!(message_id(&result), Some(10));
    }

    #[test]
    fn test_interpret_revoked_token() {
        let err = interpret(
            "sendMessage",
            401,
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::Reconnect(_)));
    }

    #[test]
    fn test_interpret_bad_request_keeps_description() {
        let err = interpret(
            "sendMessage",
            400,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::Rejected(_)));
        assert!(err.message().contains("chat not found"));
    }

    #[test]
    fn test_interpret_flood_wait() {
        let err = interpret(
            "sendMessage",
            429,
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::RateLimit(_)));
    }

    #[test]
    fn test_message_url_only_for_public_chats() {
        assert_eq!(
            message_url("@fanpost_news", 5).as_deref(),
            Some("https://t.me/fanpost_news/5")
        );
        assert_eq!(message_url("-100123", 5), None);
    }
}

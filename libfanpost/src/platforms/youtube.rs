//! YouTube platform implementation
//!
//! Video-only. A post without a video is a provider validation failure, not
//! an error in the engine. Uploads use the resumable protocol: one request
//! opens a session with the video metadata, a second sends the bytes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthAppConfig;
use crate::error::PlatformError;
use crate::oauth::{ClientAuth, OAuthClient, GOOGLE_TOKEN_URL};
use crate::platforms::{setting, title_from, Platform};
use crate::types::{
    Account, AccountSettings, Delivery, MediaItem, Provider, Published, TokenPair,
};

pub const TITLE_LIMIT: usize = 100;
pub const DESCRIPTION_LIMIT: usize = 5000;

const UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status";

pub struct YouTubePlatform {
    http: reqwest::Client,
    oauth: Option<OAuthClient>,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

impl YouTubePlatform {
    pub fn new(http: reqwest::Client, oauth: Option<OAuthClient>) -> Self {
        Self { http, oauth }
    }

    pub fn from_config(config: &OAuthAppConfig, http: reqwest::Client) -> Self {
        let oauth = OAuthClient::new(
            "YouTube",
            GOOGLE_TOKEN_URL,
            config.client_id.clone(),
            config.client_secret.clone(),
            ClientAuth::Form,
            http.clone(),
        );
        Self::new(http, Some(oauth))
    }

    fn video(media: &[MediaItem]) -> Result<&MediaItem, PlatformError> {
        media.iter().find(|m| m.is_video()).ok_or_else(|| {
            PlatformError::Validation(
                "YouTube only accepts video posts; attach a video to publish here".to_string(),
            )
        })
    }

    /// Upload metadata: title from the first line, full text as description
    fn metadata(
        content: &str,
        video: &MediaItem,
        settings: &AccountSettings,
        account: &Account,
    ) -> serde_json::Value {
        let title = title_from(content, TITLE_LIMIT).unwrap_or_else(|| {
            video
                .name
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| video.name.clone())
        });
        let privacy = setting(account, settings, "privacy").unwrap_or("public");

        json!({
            "snippet": {
                "title": title,
                "description": content,
            },
            "status": {
                "privacyStatus": privacy,
                "selfDeclaredMadeForKids": false,
            }
        })
    }

    async fn open_session(
        &self,
        token: &str,
        video: &MediaItem,
        metadata: &serde_json::Value,
    ) -> Result<String, PlatformError> {
        let response = self
            .http
            .post(UPLOAD_URL)
            .bearer_auth(token)
            .header("X-Upload-Content-Type", &video.mime_type)
            .header("X-Upload-Content-Length", video.size())
            .json(metadata)
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("YouTube", "open upload session", &e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(youtube_error(status, "open upload session", &body));
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::MediaUpload("YouTube did not return an upload session".to_string())
            })
    }

    async fn send_bytes(
        &self,
        token: &str,
        session_url: &str,
        video: &MediaItem,
    ) -> Result<String, PlatformError> {
        let response = self
            .http
            .put(session_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, &video.mime_type)
            .body(video.data.clone())
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("YouTube", "upload video", &e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::from_transport("YouTube", "upload video", &e))?;
        if !(200..300).contains(&status) {
            return Err(youtube_error(status, "upload video", &body));
        }

        serde_json::from_str::<VideoResource>(&body)
            .map(|v| v.id)
            .map_err(|e| {
                PlatformError::Posting(format!("YouTube upload response was unreadable: {}", e))
            })
    }
}

/// Classify a Google API error by its first `error.errors[].reason`
fn youtube_error(status: u16, context: &str, body: &str) -> PlatformError {
    let message = google_error(body);
    if status == 401 {
        return PlatformError::from_status("YouTube", status, context, &message);
    }
    let reason = google_reason(body).unwrap_or_default();
    match reason.as_str() {
        "quotaExceeded" | "rateLimitExceeded" | "userRateLimitExceeded" => {
            PlatformError::RateLimit(format!("YouTube {} ({}): {}", reason, context, message))
        }
        "insufficientPermissions" | "youtubeSignupRequired" => {
            PlatformError::Reconnect(format!("YouTube {} ({}): {}", reason, context, message))
        }
        _ => PlatformError::from_status("YouTube", status, context, &message),
    }
}

fn google_reason(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("errors")?
        .as_array()?
        .iter()
        .find_map(|e| e.get("reason").and_then(|r| r.as_str()))
        .map(str::to_string)
}

/// The `error.message` of a Google API error body, or the raw body
fn google_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl Platform for YouTubePlatform {
    fn provider(&self) -> Provider {
        Provider::Youtube
    }

    fn character_limit(&self) -> Option<usize> {
        Some(DESCRIPTION_LIMIT)
    }

    fn validate(&self, content: &str, media: &[MediaItem]) -> Result<(), PlatformError> {
        Self::video(media)?;
        let count = content.chars().count();
        if count > DESCRIPTION_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Content exceeds YouTube's {} character description limit (current: {} characters)",
                DESCRIPTION_LIMIT, count
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
        let video = Self::video(media)?;
        let token = account.access_token();

        let metadata = Self::metadata(content, video, settings, account);
        let session = self.open_session(token, video, &metadata).await?;
        let video_id = self.send_bytes(token, &session, video).await?;

        let mut published = Published::new(video_id.clone(), Delivery::Native)
            .with_url(format!("https://www.youtube.com/watch?v={}", video_id));
        if media.len() > 1 {
            published = published.with_note(format!(
                "YouTube takes one video per upload; only '{}' was published",
                video.name
            ));
        }
        Ok(published)
    }

    fn supports_refresh(&self) -> bool {
        self.oauth.is_some()
    }

    async fn refresh_token(&self, account: &Account) -> Result<TokenPair, PlatformError> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            PlatformError::Refresh("YouTube refresh is not configured".to_string())
        })?;
        let refresh = account
            .refresh_token()
            .ok_or_else(|| PlatformError::Refresh("no refresh token stored".to_string()))?;
        oauth.refresh(refresh).await
    }
}

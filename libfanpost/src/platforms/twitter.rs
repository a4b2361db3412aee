//! Twitter (X) platform implementation
//!
//! Posts through the v2 API with an OAuth2 user bearer token. Access tokens
//! expire after two hours, so a 401 mid-session is routine; the adapter
//! reports it as `PlatformError::Authentication` and exposes the refresh
//! grant through [`Platform::refresh_token`].
//!
//! Images use a single-request upload. Videos use the chunked
//! INIT / APPEND / FINALIZE flow and wait for server-side processing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::OAuthAppConfig;
use crate::error::PlatformError;
use crate::oauth::{ClientAuth, OAuthClient, TWITTER_TOKEN_URL};
use crate::platforms::Platform;
use crate::types::{
    Account, AccountSettings, Delivery, MediaItem, Provider, Published, TokenPair,
};

pub const CHARACTER_LIMIT: usize = 280;
pub const MAX_IMAGES: usize = 4;

const API_BASE: &str = "https://api.x.com/2";
const CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MAX_STATUS_POLLS: u32 = 20;

/// Twitter API surface used by the adapter
#[async_trait]
pub trait TwitterApi: Send + Sync {
    /// Upload one item and return its media id
    async fn upload_media(&self, token: &str, item: &MediaItem) -> Result<String, PlatformError>;

    /// Create a tweet and return its id
    async fn create_tweet(
        &self,
        token: &str,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, PlatformError>;
}

pub struct HttpTwitterApi {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MediaEnvelope {
    data: MediaData,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    id: String,
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    check_after_secs: Option<u64>,
    error: Option<ProcessingError>,
}

#[derive(Debug, Deserialize)]
struct ProcessingError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetEnvelope {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

impl HttpTwitterApi {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn read(response: reqwest::Response, context: &str) -> Result<String, PlatformError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::from_transport("Twitter", context, &e))?;
        if !(200..300).contains(&status) {
            return Err(twitter_error(status, context, &body));
        }
        Ok(body)
    }

    fn media_category(item: &MediaItem) -> &'static str {
        if item.is_video() {
            "tweet_video"
        } else if item.mime_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        }
    }

    async fn simple_upload(
        &self,
        token: &str,
        item: &MediaItem,
    ) -> Result<MediaData, PlatformError> {
        let part = reqwest::multipart::Part::stream(item.data.clone())
            .file_name(item.name.clone())
            .mime_str(&item.mime_type)
            .map_err(|e| PlatformError::MediaUpload(format!("Invalid media type: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .text("media_category", Self::media_category(item))
            .part("media", part);

        let response = self
            .http
            .post(format!("{}/media/upload", API_BASE))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Twitter", "media upload", &e))?;
        let body = Self::read(response, "media upload").await?;
        parse_media(&body)
    }

    async fn chunked_upload(
        &self,
        token: &str,
        item: &MediaItem,
    ) -> Result<MediaData, PlatformError> {
        let total_bytes = item.size().to_string();
        let init = [
            ("command", "INIT"),
            ("media_type", item.mime_type.as_str()),
            ("total_bytes", total_bytes.as_str()),
            ("media_category", Self::media_category(item)),
        ];
        let response = self
            .http
            .post(format!("{}/media/upload", API_BASE))
            .bearer_auth(token)
            .form(&init)
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Twitter", "media init", &e))?;
        let media_id = parse_media(&Self::read(response, "media init").await?)?.id;

        for (index, chunk) in item.data.chunks(CHUNK_SIZE).enumerate() {
            let part = reqwest::multipart::Part::stream(item.data.slice_ref(chunk))
                .file_name(item.name.clone());
            let form = reqwest::multipart::Form::new()
                .text("command", "APPEND")
                .text("media_id", media_id.clone())
                .text("segment_index", index.to_string())
                .part("media", part);

            let response = self
                .http
                .post(format!("{}/media/upload", API_BASE))
                .bearer_auth(token)
                .multipart(form)
                .send()
                .await
                .map_err(|e| PlatformError::from_transport("Twitter", "media append", &e))?;
            Self::read(response, "media append").await?;
        }

        let response = self
            .http
            .post(format!("{}/media/upload", API_BASE))
            .bearer_auth(token)
            .form(&[("command", "FINALIZE"), ("media_id", media_id.as_str())])
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Twitter", "media finalize", &e))?;
        let mut media = parse_media(&Self::read(response, "media finalize").await?)?;

        let mut polls = 0;
        while let Some(info) = media.processing_info.take() {
            match info.state.as_str() {
                "succeeded" => break,
                "failed" => {
                    let reason = info
                        .error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(PlatformError::MediaUpload(format!(
                        "Twitter could not process {}: {}",
                        item.name, reason
                    )));
                }
                _ if polls >= MAX_STATUS_POLLS => {
                    return Err(PlatformError::MediaUpload(format!(
                        "Twitter did not finish processing {} in time",
                        item.name
                    )));
                }
                _ => {
                    polls += 1;
                    let wait = info.check_after_secs.unwrap_or(1).clamp(1, 10);
                    tokio::time::sleep(Duration::from_secs(wait)).await;

                    let response = self
                        .http
                        .get(format!("{}/media/upload", API_BASE))
                        .bearer_auth(token)
                        .query(&[("command", "STATUS"), ("media_id", media_id.as_str())])
                        .send()
                        .await
                        .map_err(|e| PlatformError::from_transport("Twitter", "media status", &e))?;
                    media = parse_media(&Self::read(response, "media status").await?)?;
                }
            }
        }

        Ok(media)
    }
}

fn parse_media(body: &str) -> Result<MediaData, PlatformError> {
    serde_json::from_str::<MediaEnvelope>(body)
        .map(|e| e.data)
        .map_err(|e| {
            PlatformError::MediaUpload(format!("Twitter media response was unreadable: {}", e))
        })
}

fn parse_tweet(body: &str) -> Result<String, PlatformError> {
    serde_json::from_str::<TweetEnvelope>(body)
        .map(|e| e.data.id)
        .map_err(|e| {
            PlatformError::Posting(format!("Twitter tweet response was unreadable: {}", e))
        })
}

#[derive(Debug, Default, Deserialize)]
struct Problem {
    title: Option<String>,
    detail: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Classify a v2 error response
///
/// A 403 is a policy refusal (duplicate tweet, protected reply) unless the
/// problem type says the token itself is not allowed, in which case only
/// re-authorizing helps.
fn twitter_error(status: u16, context: &str, body: &str) -> PlatformError {
    let problem: Problem = serde_json::from_str(body).unwrap_or_default();
    let message = problem
        .detail
        .clone()
        .or_else(|| problem.title.clone())
        .unwrap_or_else(|| body.trim().to_string());

    if status == 403 {
        let kind = problem.kind.as_deref().unwrap_or_default();
        let title = problem.title.as_deref().unwrap_or_default();
        if kind.ends_with("/unsupported-authentication")
            || kind.ends_with("/client-forbidden")
            || title == "Unsupported Authentication"
        {
            return PlatformError::Reconnect(format!(
                "Twitter refused the token ({}): {}",
                context, message
            ));
        }
    }
    PlatformError::from_status("Twitter", status, context, &message)
}

#[async_trait]
impl TwitterApi for HttpTwitterApi {
    async fn upload_media(&self, token: &str, item: &MediaItem) -> Result<String, PlatformError> {
        let media = if item.is_video() {
            self.chunked_upload(token, item).await?
        } else {
            self.simple_upload(token, item).await?
        };
        Ok(media.id)
    }

    async fn create_tweet(
        &self,
        token: &str,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, PlatformError> {
        let mut payload = json!({ "text": text });
        if !media_ids.is_empty() {
            payload["media"] = json!({ "media_ids": media_ids });
        }

        let response = self
            .http
            .post(format!("{}/tweets", API_BASE))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Twitter", "create tweet", &e))?;
        let body = Self::read(response, "create tweet").await?;
        parse_tweet(&body)
    }
}

pub struct TwitterPlatform {
    api: Arc<dyn TwitterApi>,
    oauth: Option<OAuthClient>,
}

impl TwitterPlatform {
    pub fn new(api: Arc<dyn TwitterApi>, oauth: Option<OAuthClient>) -> Self {
        Self { api, oauth }
    }

    pub fn from_config(config: &OAuthAppConfig, http: reqwest::Client) -> Self {
        let oauth = OAuthClient::new(
            "Twitter",
            TWITTER_TOKEN_URL,
            config.client_id.clone(),
            config.client_secret.clone(),
            ClientAuth::Basic,
            http.clone(),
        );
        Self::new(Arc::new(HttpTwitterApi::new(http)), Some(oauth))
    }
}

#[async_trait]
impl Platform for TwitterPlatform {
    fn provider(&self) -> Provider {
        Provider::Twitter
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn validate(&self, content: &str, media: &[MediaItem]) -> Result<(), PlatformError> {
        let count = content.chars().count();
        if count > CHARACTER_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Twitter's {} character limit (current: {} characters)",
                CHARACTER_LIMIT, count
            )));
        }

        let videos = media.iter().filter(|m| m.is_video()).count();
        if videos > 0 && media.len() > 1 {
            return Err(PlatformError::Validation(
                "Twitter accepts either one video or up to 4 images per post".to_string(),
            ));
        }
        if media.len() > MAX_IMAGES {
            return Err(PlatformError::Validation(format!(
                "Twitter accepts at most {} images per post (got {})",
                MAX_IMAGES,
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
        _settings: &AccountSettings,
    ) -> Result<Published, PlatformError> {
        self.validate(content, media)?;
        let token = account.access_token();

        let mut media_ids = Vec::with_capacity(media.len());
        for item in media {
            let id = self.api.upload_media(token, item).await?;
            debug!("Uploaded {} to Twitter as media {}", item.name, id);
            media_ids.push(id);
        }

        let tweet_id = self.api.create_tweet(token, content, &media_ids).await?;
        let delivery = if media_ids.is_empty() {
            Delivery::Text
        } else {
            Delivery::Native
        };

        Ok(Published::new(tweet_id.clone(), delivery)
            .with_url(format!("https://x.com/{}/status/{}", account.username, tweet_id)))
    }

    fn supports_refresh(&self) -> bool {
        self.oauth.is_some()
    }

    async fn refresh_token(&self, account: &Account) -> Result<TokenPair, PlatformError> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            PlatformError::Refresh("Twitter refresh is not configured".to_string())
        })?;
        let refresh = account
            .refresh_token()
            .ok_or_else(|| PlatformError::Refresh("no refresh token stored".to_string()))?;
        oauth.refresh(refresh).await
    }
}

//! Reddit platform implementation
//!
//! Media posts go through a strictly ordered cascade, each stage tried only
//! when the previous one failed:
//!
//! 1. **Native**: lease an upload slot from Reddit, push the bytes to the
//!    leased storage endpoint, submit an `image` or `video` post referencing
//!    the asset. Video posts also need a poster image, which is hosted on the
//!    external media host.
//! 2. **External link**: upload the bytes to the external media host and
//!    submit a `link` post pointing at the public URL.
//! 3. **Text reference**: submit a self post whose body names the media and
//!    the upload error, so the user always ends up with a post.
//!
//! Stage errors accumulate and travel with the result. Credential failures
//! short-circuit the cascade so the refresh-and-retry policy can run.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RedditConfig;
use crate::error::PlatformError;
use crate::oauth::{ClientAuth, OAuthClient, REDDIT_TOKEN_URL};
use crate::platforms::media_host::MediaHost;
use crate::platforms::{setting, title_from, Platform};
use crate::types::{
    Account, AccountSettings, Delivery, MediaItem, MediaKind, Provider, Published, TokenPair,
};

pub const TITLE_LIMIT: usize = 300;
pub const SELF_TEXT_LIMIT: usize = 40_000;

const API_BASE: &str = "https://oauth.reddit.com";

/// Longest upload error quoted in a text-reference post
const NOTICE_REASON_LIMIT: usize = 500;

/// Submit errors that hold for every post kind in the subreddit
const SUBREDDIT_ERRORS: [&str; 3] = [
    "SUBREDDIT_NOEXIST",
    "SUBREDDIT_NOTALLOWED",
    "SUBREDDIT_REQUIRED",
];

const SUBMIT_FORBIDDEN: &str = "Reddit refused the submission";

/// 1x1 transparent PNG used as a video poster when the post has no image
const PLACEHOLDER_POSTER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// A leased upload slot for one media asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLease {
    pub asset_id: String,
    /// Storage endpoint the bytes are posted to
    pub action_url: String,
    /// Form fields that must precede the file part
    pub fields: Vec<(String, String)>,
    /// Where the asset is readable once uploaded
    pub asset_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionKind {
    SelfText { text: String },
    Link { url: String },
    Image { url: String },
    Video { url: String, poster_url: String },
}

impl SubmissionKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::SelfText { .. } => "self",
            Self::Link { .. } => "link",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub subreddit: String,
    pub title: String,
    pub kind: SubmissionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: String,
    pub url: Option<String>,
}

/// Reddit API surface used by the adapter
#[async_trait]
pub trait RedditApi: Send + Sync {
    async fn upload_lease(
        &self,
        token: &str,
        item: &MediaItem,
    ) -> Result<UploadLease, PlatformError>;

    async fn upload_to_lease(&self, lease: &UploadLease, item: &MediaItem)
        -> Result<(), PlatformError>;

    async fn submit(
        &self,
        token: &str,
        submission: &Submission,
    ) -> Result<Submitted, PlatformError>;
}

/// `RedditApi` over `oauth.reddit.com`
pub struct HttpRedditApi {
    http: reqwest::Client,
    user_agent: String,
}

impl HttpRedditApi {
    pub fn new(http: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            user_agent: user_agent.into(),
        }
    }

    async fn read(
        response: reqwest::Response,
        context: &str,
    ) -> Result<String, PlatformError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::from_transport("Reddit", context, &e))?;
        if status == 403 && context == "submit" {
            // Banned from, or not approved in, a private subreddit
            return Err(PlatformError::Rejected(format!(
                "{} (HTTP 403): {}",
                SUBMIT_FORBIDDEN,
                body.trim()
            )));
        }
        if !(200..300).contains(&status) {
            return Err(PlatformError::from_status("Reddit", status, context, &body));
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct LeaseResponse {
    args: LeaseArgs,
    asset: LeaseAsset,
}

#[derive(Debug, Deserialize)]
struct LeaseArgs {
    action: String,
    fields: Vec<LeaseField>,
}

#[derive(Debug, Deserialize)]
struct LeaseField {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct LeaseAsset {
    asset_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitEnvelope {
    json: SubmitJson,
}

#[derive(Debug, Deserialize)]
struct SubmitJson {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    id: Option<String>,
    name: Option<String>,
    url: Option<String>,
    user_submitted_page: Option<String>,
}

fn parse_lease(body: &str) -> Result<UploadLease, PlatformError> {
    let parsed: LeaseResponse = serde_json::from_str(body).map_err(|e| {
        PlatformError::MediaUpload(format!("Reddit upload lease was unreadable: {}", e))
    })?;

    let action_url = if parsed.args.action.starts_with("//") {
        format!("https:{}", parsed.args.action)
    } else {
        parsed.args.action
    };
    let fields: Vec<(String, String)> = parsed
        .args
        .fields
        .into_iter()
        .map(|f| (f.name, f.value))
        .collect();
    let key = fields
        .iter()
        .find(|(name, _)| name == "key")
        .map(|(_, value)| value.clone())
        .ok_or_else(|| {
            PlatformError::MediaUpload("Reddit upload lease carried no storage key".to_string())
        })?;

    Ok(UploadLease {
        asset_id: parsed.asset.asset_id,
        asset_url: format!("{}/{}", action_url.trim_end_matches('/'), key),
        action_url,
        fields,
    })
}

fn parse_submit(body: &str) -> Result<Submitted, PlatformError> {
    let parsed: SubmitEnvelope = serde_json::from_str(body).map_err(|e| {
        PlatformError::Posting(format!("Reddit submit response was unreadable: {}", e))
    })?;

    if !parsed.json.errors.is_empty() {
        // Each error is [CODE, message, field]
        let messages: Vec<String> = parsed
            .json
            .errors
            .iter()
            .map(|e| {
                let code = e.first().and_then(|v| v.as_str()).unwrap_or("ERROR");
                let text = e.get(1).and_then(|v| v.as_str()).unwrap_or("");
                format!("{}: {}", code, text)
            })
            .collect();
        return Err(PlatformError::Rejected(format!(
            "Reddit declined the submission: {}",
            messages.join("; ")
        )));
    }

    let data = parsed.json.data.ok_or_else(|| {
        PlatformError::Posting("Reddit submit response carried no data".to_string())
    })?;

    // Media submissions are processed asynchronously and may not carry an id yet
    let id = data
        .id
        .or(data.name)
        .unwrap_or_else(|| "pending".to_string());
    Ok(Submitted {
        id,
        url: data.url.or(data.user_submitted_page),
    })
}

#[async_trait]
impl RedditApi for HttpRedditApi {
    async fn upload_lease(
        &self,
        token: &str,
        item: &MediaItem,
    ) -> Result<UploadLease, PlatformError> {
        let response = self
            .http
            .post(format!("{}/api/media/asset.json", API_BASE))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .form(&[("filepath", item.name.as_str()), ("mimetype", item.mime_type.as_str())])
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Reddit", "upload lease", &e))?;

        let body = Self::read(response, "upload lease").await?;
        parse_lease(&body)
    }

    async fn upload_to_lease(
        &self,
        lease: &UploadLease,
        item: &MediaItem,
    ) -> Result<(), PlatformError> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &lease.fields {
            form = form.text(name.clone(), value.clone());
        }
        let part = reqwest::multipart::Part::stream(item.data.clone())
            .file_name(item.name.clone())
            .mime_str(&item.mime_type)
            .map_err(|e| PlatformError::MediaUpload(format!("Invalid media type: {}", e)))?;
        form = form.part("file", part);

        let response = self
            .http
            .post(&lease.action_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PlatformError::MediaUpload(format!("Reddit storage unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Storage errors never reflect on the account's credentials
            return Err(PlatformError::MediaUpload(format!(
                "Reddit storage returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(())
    }

    async fn submit(
        &self,
        token: &str,
        submission: &Submission,
    ) -> Result<Submitted, PlatformError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("api_type", "json"),
            ("sr", submission.subreddit.as_str()),
            ("title", submission.title.as_str()),
            ("kind", submission.kind.as_str()),
            ("resubmit", "true"),
        ];
        match &submission.kind {
            SubmissionKind::SelfText { text } => form.push(("text", text.as_str())),
            SubmissionKind::Link { url } | SubmissionKind::Image { url } => {
                form.push(("url", url.as_str()))
            }
            SubmissionKind::Video { url, poster_url } => {
                form.push(("url", url.as_str()));
                form.push(("video_poster_url", poster_url.as_str()));
            }
        }

        let response = self
            .http
            .post(format!("{}/api/submit", API_BASE))
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .form(&form)
            .send()
            .await
            .map_err(|e| PlatformError::from_transport("Reddit", "submit", &e))?;

        let body = Self::read(response, "submit").await?;
        parse_submit(&body)
    }
}

pub struct RedditPlatform {
    api: Arc<dyn RedditApi>,
    media_host: Option<Arc<dyn MediaHost>>,
    oauth: Option<OAuthClient>,
}

impl RedditPlatform {
    pub fn new(
        api: Arc<dyn RedditApi>,
        media_host: Option<Arc<dyn MediaHost>>,
        oauth: Option<OAuthClient>,
    ) -> Self {
        Self {
            api,
            media_host,
            oauth,
        }
    }

    pub fn from_config(
        config: &RedditConfig,
        media_host: Option<Arc<dyn MediaHost>>,
        http: reqwest::Client,
    ) -> Self {
        let oauth = OAuthClient::new(
            "Reddit",
            REDDIT_TOKEN_URL,
            config.client_id.clone(),
            // Installed apps use an empty secret with basic auth
            Some(config.client_secret.clone().unwrap_or_default()),
            ClientAuth::Basic,
            http.clone(),
        );
        let api = HttpRedditApi::new(http, config.user_agent.clone());
        Self::new(Arc::new(api), media_host, Some(oauth))
    }

    /// Subreddit from settings, then account metadata, then the user profile
    fn subreddit(account: &Account, settings: &AccountSettings) -> String {
        setting(account, settings, "subreddit")
            .map(|s| s.trim_start_matches("r/").trim_start_matches("/r/").to_string())
            .unwrap_or_else(|| format!("u_{}", account.username))
    }

    fn title(content: &str, primary: Option<&MediaItem>) -> Result<String, PlatformError> {
        title_from(content, TITLE_LIMIT)
            .or_else(|| primary.map(|m| m.name.clone()))
            .ok_or_else(|| PlatformError::Validation("Reddit posts need a title".to_string()))
    }

    /// The item Reddit gets natively: first video, else first image
    fn primary_media(media: &[MediaItem]) -> Option<&MediaItem> {
        media
            .iter()
            .find(|m| m.is_video())
            .or_else(|| media.iter().find(|m| m.is_image()))
    }

    async fn native_stage(
        &self,
        token: &str,
        subreddit: &str,
        title: &str,
        primary: &MediaItem,
        media: &[MediaItem],
    ) -> Result<Submitted, PlatformError> {
        let lease = self.api.upload_lease(token, primary).await?;
        self.api.upload_to_lease(&lease, primary).await?;
        debug!("Uploaded {} to Reddit asset {}", primary.name, lease.asset_id);

        let kind = match primary.kind {
            MediaKind::Image => SubmissionKind::Image {
                url: lease.asset_url,
            },
            MediaKind::Video => {
                let poster_url = self.poster_url(media).await?;
                SubmissionKind::Video {
                    url: lease.asset_url,
                    poster_url,
                }
            }
        };

        self.api
            .submit(
                token,
                &Submission {
                    subreddit: subreddit.to_string(),
                    title: title.to_string(),
                    kind,
                },
            )
            .await
    }

    /// Host a poster for a video post: the first image in the post, else a placeholder
    async fn poster_url(&self, media: &[MediaItem]) -> Result<String, PlatformError> {
        let host = self.media_host.as_ref().ok_or_else(|| {
            PlatformError::MediaUpload(
                "Reddit video posts need a poster image and no media host is configured"
                    .to_string(),
            )
        })?;

        if let Some(image) = media.iter().find(|m| m.is_image()) {
            return host.upload(image).await;
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(PLACEHOLDER_POSTER_PNG)
            .map_err(|e| PlatformError::MediaUpload(format!("Placeholder poster: {}", e)))?;
        let placeholder = MediaItem {
            name: "poster.png".to_string(),
            mime_type: "image/png".to_string(),
            kind: MediaKind::Image,
            data: data.into(),
        };
        host.upload(&placeholder).await
    }

    async fn external_stage(
        &self,
        token: &str,
        subreddit: &str,
        title: &str,
        primary: &MediaItem,
    ) -> Result<(Submitted, String), PlatformError> {
        let host = self.media_host.as_ref().ok_or_else(|| {
            PlatformError::MediaUpload("no external media host is configured".to_string())
        })?;
        let url = host.upload(primary).await?;
        let submitted = self
            .api
            .submit(
                token,
                &Submission {
                    subreddit: subreddit.to_string(),
                    title: title.to_string(),
                    kind: SubmissionKind::Link { url: url.clone() },
                },
            )
            .await?;
        Ok((submitted, url))
    }

    fn published(submitted: Submitted, delivery: Delivery, subreddit: &str) -> Published {
        let mut published = Published::new(submitted.id, delivery).with_channel(subreddit);
        if let Some(url) = submitted.url {
            published = published.with_url(url);
        }
        published
    }
}

/// Body for the last-resort text post, kept within `SELF_TEXT_LIMIT`
///
/// The quoted error is cut first, then the user's text, so the notice
/// naming the media always survives.
fn text_reference_body(content: &str, media: &MediaItem, reason: &str) -> String {
    let notice = format!(
        "[Attached {} '{}' ({}) could not be uploaded: {}]",
        media.kind.as_str(),
        media.name,
        media.mime_type,
        truncate(reason, NOTICE_REASON_LIMIT)
    );
    let notice = truncate(&notice, SELF_TEXT_LIMIT);
    let content = content.trim();
    let room = SELF_TEXT_LIMIT.saturating_sub(notice.chars().count() + 2);
    if content.is_empty() || room < 4 {
        notice
    } else {
        format!("{}\n\n{}", truncate(content, room), notice)
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// A rejection no other post kind in the same subreddit can get past
fn rejects_subreddit(error: &PlatformError) -> bool {
    match error {
        PlatformError::Rejected(message) => {
            message.contains(SUBMIT_FORBIDDEN)
                || SUBREDDIT_ERRORS.iter().any(|code| message.contains(code))
        }
        _ => false,
    }
}

/// Keep the variant of `error` but append the earlier stage failures
fn with_stage_history(error: PlatformError, history: &[String]) -> PlatformError {
    if history.is_empty() {
        return error;
    }
    let message = format!("{} (after: {})", error.message(), history.join("; "));
    match error {
        PlatformError::Authentication(_) => PlatformError::Authentication(message),
        PlatformError::Reconnect(_) => PlatformError::Reconnect(message),
        PlatformError::Validation(_) => PlatformError::Validation(message),
        PlatformError::Rejected(_) => PlatformError::Rejected(message),
        PlatformError::Posting(_) => PlatformError::Posting(message),
        PlatformError::Network(_) => PlatformError::Network(message),
        PlatformError::RateLimit(_) => PlatformError::RateLimit(message),
        PlatformError::MediaUpload(_) => PlatformError::MediaUpload(message),
        PlatformError::Refresh(_) => PlatformError::Refresh(message),
    }
}

#[async_trait]
impl Platform for RedditPlatform {
    fn provider(&self) -> Provider {
        Provider::Reddit
    }

    fn character_limit(&self) -> Option<usize> {
        Some(SELF_TEXT_LIMIT)
    }

    async fn publish(
        &self,
        account: &Account,
        content: &str,
        media: &[MediaItem],
        settings: &AccountSettings,
    ) -> Result<Published, PlatformError> {
        self.validate(content, media)?;

        let subreddit = Self::subreddit(account, settings);
        let primary = Self::primary_media(media);
        let title = Self::title(content, primary)?;
        let token = account.access_token();

        let Some(primary) = primary else {
            let submitted = self
                .api
                .submit(
                    token,
                    &Submission {
                        subreddit: subreddit.clone(),
                        title,
                        kind: SubmissionKind::SelfText {
                            text: content.to_string(),
                        },
                    },
                )
                .await?;
            return Ok(Self::published(submitted, Delivery::Text, &subreddit));
        };

        if media.len() > 1 {
            debug!(
                "Reddit gets one asset per post; using {} of {} media items",
                primary.name,
                media.len()
            );
        }

        let mut history: Vec<String> = Vec::new();

        match self
            .native_stage(token, &subreddit, &title, primary, media)
            .await
        {
            Ok(submitted) => return Ok(Self::published(submitted, Delivery::Native, &subreddit)),
            Err(e @ PlatformError::Authentication(_)) | Err(e @ PlatformError::Reconnect(_)) => {
                return Err(e)
            }
            Err(e) if rejects_subreddit(&e) => return Err(e),
            Err(e) => {
                warn!(
                    "Reddit native upload of {} to r/{} failed, trying external host: {}",
                    primary.name, subreddit, e
                );
                history.push(format!("native upload: {}", e.message()));
            }
        }

        match self.external_stage(token, &subreddit, &title, primary).await {
            Ok((submitted, url)) => {
                let note = format!(
                    "Media '{}' was linked from an external host ({}) because Reddit's upload failed",
                    primary.name, url
                );
                return Ok(Self::published(submitted, Delivery::ExternalLink, &subreddit)
                    .with_note(note));
            }
            Err(e @ PlatformError::Authentication(_)) | Err(e @ PlatformError::Reconnect(_)) => {
                return Err(with_stage_history(e, &history))
            }
            Err(e) if rejects_subreddit(&e) => return Err(with_stage_history(e, &history)),
            Err(e) => {
                warn!(
                    "Reddit external-host fallback for {} failed, posting text reference: {}",
                    primary.name, e
                );
                history.push(format!("external host: {}", e.message()));
            }
        }

        let reason = history.last().cloned().unwrap_or_default();
        let body = text_reference_body(content, primary, &reason);
        let submitted = self
            .api
            .submit(
                token,
                &Submission {
                    subreddit: subreddit.clone(),
                    title,
                    kind: SubmissionKind::SelfText { text: body },
                },
            )
            .await
            .map_err(|e| with_stage_history(e, &history))?;

        let note = format!(
            "Media '{}' ({}) could not be uploaded and was posted as a text reference. {}",
            primary.name,
            primary.mime_type,
            history.join("; ")
        );
        Ok(Self::published(submitted, Delivery::TextReference, &subreddit).with_note(note))
    }

    fn channel(&self, account: &Account, settings: &AccountSettings) -> Option<String> {
        Some(Self::subreddit(account, settings))
    }

    fn supports_refresh(&self) -> bool {
        self.oauth.is_some()
    }

    async fn refresh_token(&self, account: &Account) -> Result<TokenPair, PlatformError> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            PlatformError::Refresh("Reddit refresh is not configured".to_string())
        })?;
        let refresh = account
            .refresh_token()
            .ok_or_else(|| PlatformError::Refresh("no refresh token stored".to_string()))?;
        oauth.refresh(refresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeReddit {
        lease_error: Option<PlatformError>,
        upload_error: Option<PlatformError>,
        /// Fail submissions of these kinds
        reject_kinds: Vec<&'static str>,
        /// Fail every submission
        submit_error: Option<PlatformError>,
        submissions: Mutex<Vec<Submission>>,
    }

    #[async_trait]
    impl RedditApi for FakeReddit {
        async fn upload_lease(
            &self,
            _token: &str,
            item: &MediaItem,
        ) -> Result<UploadLease, PlatformError> {
            if let Some(e) = &self.lease_error {
                return Err(e.clone());
            }
            Ok(UploadLease {
                asset_id: format!("asset-{}", item.name),
                action_url: "https://storage.test".to_string(),
                fields: vec![("key".to_string(), item.name.clone())],
                asset_url: format!("https://storage.test/{}", item.name),
            })
        }

        async fn upload_to_lease(
            &self,
            _lease: &UploadLease,
            _item: &MediaItem,
        ) -> Result<(), PlatformError> {
            match &self.upload_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn submit(
            &self,
            _token: &str,
            submission: &Submission,
        ) -> Result<Submitted, PlatformError> {
            self.submissions.lock().unwrap().push(submission.clone());
            if let Some(e) = &self.submit_error {
                return Err(e.clone());
            }
            if let SubmissionKind::SelfText { text } = &submission.kind {
                if text.chars().count() > SELF_TEXT_LIMIT {
                    return Err(PlatformError::Rejected(
                        "Reddit declined the submission: TOO_LONG: this is too long".to_string(),
                    ));
                }
            }
            if self.reject_kinds.contains(&submission.kind.as_str()) {
                return Err(PlatformError::Rejected(format!(
                    "{} posts are not allowed in r/{}",
                    submission.kind.as_str(),
                    submission.subreddit
                )));
            }
            Ok(Submitted {
                id: "t3_abc".to_string(),
                url: Some(format!("https://reddit.com/r/{}/comments/abc", submission.subreddit)),
            })
        }
    }

    struct FakeHost {
        fail: bool,
        uploads: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn working() -> Self {
            Self {
                fail: false,
                uploads: Mutex::new(Vec::new()),
            }
        }

        fn broken() -> Self {
            Self {
                fail: true,
                uploads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaHost for FakeHost {
        async fn upload(&self, item: &MediaItem) -> Result<String, PlatformError> {
            self.uploads.lock().unwrap().push(item.name.clone());
            if self.fail {
                return Err(PlatformError::MediaUpload("host is down".to_string()));
            }
            Ok(format!("https://host.test/{}", item.name))
        }
    }

    fn account() -> Account {
        Account::new("r1", "u1", Provider::Reddit, "alice", "token")
    }

    fn image(name: &str) -> MediaItem {
        MediaItem {
            name: name.to_string(),
            mime_type: "image/png".to_string(),
            kind: MediaKind::Image,
            data: bytes::Bytes::from_static(b"\x89PNG"),
        }
    }

    fn video(name: &str) -> MediaItem {
        MediaItem {
            name: name.to_string(),
            mime_type: "video/mp4".to_string(),
            kind: MediaKind::Video,
            data: bytes::Bytes::from_static(b"\x00\x00\x00\x18ftyp"),
        }
    }

    fn platform(api: Arc<FakeReddit>, host: Option<Arc<FakeHost>>) -> RedditPlatform {
        RedditPlatform::new(api, host.map(|h| h as Arc<dyn MediaHost>), None)
    }

    fn settings(subreddit: &str) -> AccountSettings {
        let mut s = AccountSettings::new();
        s.insert("subreddit".to_string(), subreddit.to_string());
        s
    }

    #[tokio::test]
    async fn test_text_post_goes_to_user_profile_by_default() {
        let api = Arc::new(FakeReddit::default());
        let reddit = platform(api.clone(), None);

        let published = reddit
            .publish(&account(), "Hello\nsecond line", &[], &AccountSettings::new())
            .await
            .unwrap();

        assert_eq!(published.delivery, Delivery::Text);
        assert_eq!(published.channel.as_deref(), Some("u_alice"));
        let subs = api.submissions.lock().unwrap();
        assert_eq!(subs[0].title, "Hello");
        assert_eq!(subs[0].subreddit, "u_alice");
    }

    #[tokio::test]
    async fn test_native_image_upload() {
        let api = Arc::new(FakeReddit::default());
        let reddit = platform(api.clone(), Some(Arc::new(FakeHost::working())));

        let published = reddit
            .publish(&account(), "Look", &[image("cat.png")], &settings("r/cats"))
            .await
            .unwrap();

        assert_eq!(published.delivery, Delivery::Native);
        assert_eq!(published.channel.as_deref(), Some("cats"));
        let subs = api.submissions.lock().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(
            subs[0].kind,
            SubmissionKind::Image {
                url: "https://storage.test/cat.png".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_native_video_uses_first_image_as_poster() {
        let api = Arc::new(FakeReddit::default());
        let host = Arc::new(FakeHost::working());
        let reddit = platform(api.clone(), Some(host.clone()));

        let media = [image("thumb.png"), video("clip.mp4")];
        let published = reddit
            .publish(&account(), "Clip", &media, &settings("videos"))
            .await
            .unwrap();

        assert_eq!(published.delivery, Delivery::Native);
        assert_eq!(*host.uploads.lock().unwrap(), vec!["thumb.png"]);
        let subs = api.submissions.lock().unwrap();
        assert_eq!(
            subs[0].kind,
            SubmissionKind::Video {
                url: "https://storage.test/clip.mp4".to_string(),
                poster_url: "https://host.test/thumb.png".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_video_without_image_hosts_placeholder_poster() {
        let api = Arc::new(FakeReddit::default());
        let host = Arc::new(FakeHost::working());
        let reddit = platform(api, Some(host.clone()));

        reddit
            .publish(&account(), "Clip", &[video("clip.mp4")], &settings("videos"))
            .await
            .unwrap();
        assert_eq!(*host.uploads.lock().unwrap(), vec!["poster.png"]);
    }

    #[tokio::test]
    async fn test_lease_failure_falls_back_to_external_link() {
        let api = Arc::new(FakeReddit {
            lease_error: Some(PlatformError::Network("lease timed out".to_string())),
            ..Default::default()
        });
        let reddit = platform(api.clone(), Some(Arc::new(FakeHost::working())));

        let published = reddit
            .publish(&account(), "Look", &[image("cat.png")], &settings("cats"))
            .await
            .unwrap();

        assert_eq!(published.delivery, Delivery::ExternalLink);
        assert!(published.note.unwrap().contains("cat.png"));
        let subs = api.submissions.lock().unwrap();
        assert_eq!(
            subs[0].kind,
            SubmissionKind::Link {
                url: "https://host.test/cat.png".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_all_uploads_failing_posts_text_reference() {
        let api = Arc::new(FakeReddit {
            upload_error: Some(PlatformError::MediaUpload("storage said 500".to_string())),
            ..Default::default()
        });
        let reddit = platform(api.clone(), Some(Arc::new(FakeHost::broken())));

        let published = reddit
            .publish(&account(), "Look at this", &[image("holiday.png")], &settings("pics"))
            .await
            .unwrap();

        assert_eq!(published.delivery, Delivery::TextReference);
        let note = published.note.unwrap();
        assert!(note.contains("holiday.png"));
        assert!(note.contains("storage said 500"));
        assert!(note.contains("host is down"));

        let subs = api.submissions.lock().unwrap();
        match &subs[0].kind {
            SubmissionKind::SelfText { text } => {
                assert!(text.starts_with("Look at this"));
                assert!(text.contains("holiday.png"));
                assert!(text.contains("image/png"));
                assert!(text.contains("host is down"));
            }
            other => panic!("Expected self post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_host_still_reaches_text_reference() {
        let api = Arc::new(FakeReddit {
            lease_error: Some(PlatformError::MediaUpload("no lease".to_string())),
            ..Default::default()
        });
        let reddit = platform(api, None);

        let published = reddit
            .publish(&account(), "", &[image("pic.png")], &settings("pics"))
            .await
            .unwrap();
        assert_eq!(published.delivery, Delivery::TextReference);
        assert!(published.note.unwrap().contains("no external media host"));
    }

    #[tokio::test]
    async fn test_rejected_media_submit_cascades() {
        let api = Arc::new(FakeReddit {
            reject_kinds: vec!["image"],
            ..Default::default()
        });
        let reddit = platform(api, Some(Arc::new(FakeHost::working())));

        let published = reddit
            .publish(&account(), "Look", &[image("cat.png")], &settings("textonly"))
            .await
            .unwrap();
        assert_eq!(published.delivery, Delivery::ExternalLink);
    }

    #[tokio::test]
    async fn test_final_failure_carries_every_stage() {
        let api = Arc::new(FakeReddit {
            upload_error: Some(PlatformError::MediaUpload("storage said 500".to_string())),
            reject_kinds: vec!["link", "self"],
            ..Default::default()
        });
        let reddit = platform(api, Some(Arc::new(FakeHost::working())));

        let err = reddit
            .publish(&account(), "Look", &[image("cat.png")], &settings("strict"))
            .await
            .unwrap_err();

        assert!(matches!(err, PlatformError::Rejected(_)));
        let message = err.message();
        assert!(message.contains("self posts are not allowed"));
        assert!(message.contains("storage said 500"));
        assert!(message.contains("link posts are not allowed"));
    }

    #[tokio::test]
    async fn test_text_reference_fits_self_text_limit() {
        let api = Arc::new(FakeReddit {
            upload_error: Some(PlatformError::MediaUpload("x".repeat(2_000))),
            ..Default::default()
        });
        let reddit = platform(api.clone(), Some(Arc::new(FakeHost::broken())));
        let content = "a".repeat(39_990);

        let published = reddit
            .publish(&account(), &content, &[image("holiday.png")], &settings("pics"))
            .await
            .unwrap();

        assert_eq!(published.delivery, Delivery::TextReference);
        let subs = api.submissions.lock().unwrap();
        match &subs.last().unwrap().kind {
            SubmissionKind::SelfText { text } => {
                assert!(text.chars().count() <= SELF_TEXT_LIMIT);
                assert!(text.starts_with("aaaa"));
                assert!(text.contains("holiday.png"));
                assert!(text.contains("image/png"));
            }
            other => panic!("Expected self post, got {:?}", other),
        }
    }

    #[test]
    fn test_text_reference_body_keeps_short_content_whole() {
        let body = text_reference_body("Look", &image("cat.png"), "host is down");
        assert_eq!(
            body,
            "Look\n\n[Attached image 'cat.png' (image/png) could not be uploaded: host is down]"
        );
    }

    #[tokio::test]
    async fn test_subreddit_rejection_stops_cascade() {
        let api = Arc::new(FakeReddit {
            submit_error: Some(PlatformError::Rejected(
                "Reddit declined the submission: SUBREDDIT_NOEXIST: that subreddit doesn't exist"
                    .to_string(),
            )),
            ..Default::default()
        });
        let host = Arc::new(FakeHost::working());
        let reddit = platform(api.clone(), Some(host.clone()));

        let err = reddit
            .publish(&account(), "Look", &[image("cat.png")], &settings("nosuchsub"))
            .await
            .unwrap_err();

        assert!(matches!(err, PlatformError::Rejected(_)));
        assert!(err.message().contains("SUBREDDIT_NOEXIST"));
        assert!(host.uploads.lock().unwrap().is_empty());
        assert_eq!(api.submissions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_subreddit() {
        assert!(rejects_subreddit(&PlatformError::Rejected(format!(
            "{} (HTTP 403): Forbidden",
            SUBMIT_FORBIDDEN
        ))));
        assert!(rejects_subreddit(&PlatformError::Rejected(
            "Reddit declined the submission: SUBREDDIT_NOTALLOWED: you aren't allowed to post there"
                .to_string()
        )));
        assert!(!rejects_subreddit(&PlatformError::Rejected(
            "image posts are not allowed in r/textonly".to_string()
        )));
        assert!(!rejects_subreddit(&PlatformError::MediaUpload(
            "SUBREDDIT_NOEXIST".to_string()
        )));
    }

    #[tokio::test]
    async fn test_expired_token_short_circuits_cascade() {
        let api = Arc::new(FakeReddit {
            lease_error: Some(PlatformError::Authentication("401".to_string())),
            ..Default::default()
        });
        let host = Arc::new(FakeHost::working());
        let reddit = platform(api.clone(), Some(host.clone()));

        let err = reddit
            .publish(&account(), "Look", &[image("cat.png")], &settings("cats"))
            .await
            .unwrap_err();

        assert!(matches!(err, PlatformError::Authentication(_)));
        assert!(host.uploads.lock().unwrap().is_empty());
        assert!(api.submissions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_lease() {
        let body = r#"{
            "args": {
                "action": "//reddit-uploaded-media.s3-accelerate.amazonaws.com",
                "fields": [
                    {"name": "acl", "value": "private"},
                    {"name": "key", "value": "rte_images/abc123"}
                ]
            },
            "asset": {"asset_id": "abc123", "processing_state": "incomplete"}
        }"#;
        let lease = parse_lease(body).unwrap();
        assert_eq!(lease.asset_id, "abc123");
        assert_eq!(
            lease.action_url,
            "https://reddit-uploaded-media.s3-accelerate.amazonaws.com"
        );
        assert_eq!(
            lease.asset_url,
            "https://reddit-uploaded-media.s3-accelerate.amazonaws.com/rte_images/abc123"
        );
        assert_eq!(lease.fields.len(), 2);
    }

    #[test]
    fn test_parse_submit_errors_are_rejections() {
        let body = r#"{"json":{"errors":[["SUBREDDIT_NOEXIST","that subreddit doesn't exist","sr"]]}}"#;
        let err = parse_submit(body).unwrap_err();
        assert!(matches!(err, PlatformError::Rejected(_)));
        assert!(err.message().contains("SUBREDDIT_NOEXIST"));
    }

    #[test]
    fn test_parse_submit_success() {
        let body = r#"{"json":{"errors":[],"data":{"url":"https://www.reddit.com/r/test/comments/xyz/hello/","id":"xyz","name":"t3_xyz"}}}"#;
        let submitted = parse_submit(body).unwrap();
        assert_eq!(submitted.id, "xyz");
        assert!(submitted.url.unwrap().contains("/comments/xyz/"));
    }

    #[test]
    fn test_channel_for_failures() {
        let reddit = platform(Arc::new(FakeReddit::default()), None);
        let account = account().with_metadata("subreddit", "/r/rust");
        assert_eq!(
            reddit.channel(&account, &AccountSettings::new()).as_deref(),
            Some("rust")
        );
    }
}

//! External media host used when a provider's own upload path fails

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::MediaHostConfig;
use crate::error::PlatformError;
use crate::types::MediaItem;

/// Uploads bytes somewhere public and returns the URL
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// # Errors
    ///
    /// Always `PlatformError::MediaUpload`; host failures never say anything
    /// about the posting account's credentials.
    async fn upload(&self, item: &MediaItem) -> Result<String, PlatformError>;
}

/// Multipart upload to a generic host returning `{"url": ...}`
pub struct HttpMediaHost {
    upload_url: String,
    api_key: Option<SecretString>,
    http: reqwest::Client,
}

impl HttpMediaHost {
    pub fn new(config: &MediaHostConfig, http: reqwest::Client) -> Self {
        Self {
            upload_url: config.upload_url.clone(),
            api_key: config.api_key.clone().map(SecretString::from),
            http,
        }
    }
}

#[async_trait]
impl MediaHost for HttpMediaHost {
    async fn upload(&self, item: &MediaItem) -> Result<String, PlatformError> {
        let part = reqwest::multipart::Part::stream(item.data.clone())
            .file_name(item.name.clone())
            .mime_str(&item.mime_type)
            .map_err(|e| PlatformError::MediaUpload(format!("Invalid media type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.http.post(&self.upload_url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            PlatformError::MediaUpload(format!("Media host unreachable: {}", e))
        })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(PlatformError::MediaUpload(format!(
                "Media host returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        public_url(&body).ok_or_else(|| {
            PlatformError::MediaUpload(format!("Media host response had no URL: {}", body.trim()))
        })
    }
}

/// Accepts `{"url": ..}`, `{"link": ..}` or either nested under `data`
fn public_url(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let pick = |v: &serde_json::Value| {
        v.get("url")
            .or_else(|| v.get("link"))
            .and_then(|u| u.as_str())
            .map(str::to_string)
    };
    pick(&value).or_else(|| value.get("data").and_then(pick))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_shapes() {
        assert_eq!(
            public_url(r#"{"url":"https://m.example/a.png"}"#).as_deref(),
            Some("https://m.example/a.png")
        );
        assert_eq!(
            public_url(r#"{"data":{"link":"https://i.example/b.jpg"},"success":true}"#).as_deref(),
            Some("https://i.example/b.jpg")
        );
        assert_eq!(public_url(r#"{"ok":true}"#), None);
        assert_eq!(public_url("not json"), None);
    }
}

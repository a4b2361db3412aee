//! Media normalization
//!
//! Turns caller-supplied media payloads into validated [`MediaItem`]s. Each
//! payload is decoded exactly once; the resulting buffers are shared read-only
//! by every dispatch unit.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::MediaConfig;
use crate::error::ValidationError;
use crate::types::{MediaItem, MediaKind};

/// Default ceiling for images (10 MB)
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Default ceiling for videos (100 MB)
pub const MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;

/// How a media payload arrives from the boundary layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum MediaPayload {
    /// Standard base64 text
    Base64(String),
    /// `data:<mime>;base64,<payload>` URL
    DataUrl(String),
    /// Already-decoded bytes
    Bytes(Vec<u8>),
}

/// Media exactly as the caller supplied it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMedia {
    pub name: String,
    pub mime_type: Option<String>,
    pub payload: MediaPayload,
}

impl RawMedia {
    pub fn from_bytes(name: impl Into<String>, mime_type: Option<&str>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.map(str::to_string),
            payload: MediaPayload::Bytes(data),
        }
    }

    pub fn from_base64(
        name: impl Into<String>,
        mime_type: &str,
        encoded: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: Some(mime_type.to_string()),
            payload: MediaPayload::Base64(encoded.into()),
        }
    }

    pub fn from_data_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            payload: MediaPayload::DataUrl(url.into()),
        }
    }
}

/// Size ceilings applied per media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaLimits {
    pub max_image_bytes: u64,
    pub max_video_bytes: u64,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: MAX_IMAGE_BYTES,
            max_video_bytes: MAX_VIDEO_BYTES,
        }
    }
}

impl MediaLimits {
    pub fn limit_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Video => self.max_video_bytes,
        }
    }
}

impl From<&MediaConfig> for MediaLimits {
    fn from(config: &MediaConfig) -> Self {
        Self {
            max_image_bytes: config.max_image_bytes,
            max_video_bytes: config.max_video_bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaNormalizer {
    limits: MediaLimits,
}

impl MediaNormalizer {
    pub fn new(limits: MediaLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> MediaLimits {
        self.limits
    }

    /// Decode and validate every item
    ///
    /// # Errors
    ///
    /// Fails on the first item that cannot be decoded, has an unsupported
    /// type, is empty, or exceeds the ceiling for its kind. The error names
    /// the offending file.
    pub fn normalize(&self, raw: Vec<RawMedia>) -> Result<Arc<[MediaItem]>, ValidationError> {
        let mut items = Vec::with_capacity(raw.len());
        for media in raw {
            items.push(self.normalize_one(media)?);
        }
        Ok(items.into())
    }

    fn normalize_one(&self, media: RawMedia) -> Result<MediaItem, ValidationError> {
        let RawMedia {
            name,
            mime_type,
            payload,
        } = media;

        let (declared_from_url, data) = match payload {
            MediaPayload::Bytes(data) => (None, data),
            MediaPayload::Base64(encoded) => (None, decode_base64(&name, &encoded)?),
            MediaPayload::DataUrl(url) => {
                let (mime, encoded) = split_data_url(&name, &url)?;
                (Some(mime), decode_base64(&name, encoded)?)
            }
        };

        let mime_type = mime_type
            .filter(|m| !m.trim().is_empty())
            .or(declared_from_url)
            .or_else(|| mime_from_extension(&name).map(str::to_string))
            .map(|m| canonical_mime(&m))
            .ok_or_else(|| ValidationError::UnsupportedMedia {
                name: name.clone(),
                mime_type: "unknown".to_string(),
            })?;

        let kind = MediaKind::from_mime(&mime_type).ok_or_else(|| {
            ValidationError::UnsupportedMedia {
                name: name.clone(),
                mime_type: mime_type.clone(),
            }
        })?;

        if data.is_empty() {
            return Err(ValidationError::EmptyMedia { name });
        }

        let size = data.len() as u64;
        let limit = self.limits.limit_for(kind);
        if size > limit {
            return Err(ValidationError::MediaTooLarge { name, size, limit });
        }

        tracing::debug!(
            "Normalized media '{}' ({}, {} bytes)",
            name,
            mime_type,
            size
        );

        Ok(MediaItem {
            name,
            mime_type,
            kind,
            data: Bytes::from(data),
        })
    }
}

fn decode_base64(name: &str, encoded: &str) -> Result<Vec<u8>, ValidationError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ValidationError::MediaDecode {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

/// Split `data:image/png;base64,AAAA` into its MIME type and payload
fn split_data_url<'a>(name: &str, url: &'a str) -> Result<(String, &'a str), ValidationError> {
    let malformed = |reason: &str| ValidationError::MediaDecode {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| malformed("not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| malformed("data URL has no payload"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| malformed("only base64 data URLs are supported"))?;

    Ok((mime.to_string(), payload))
}

fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "mp4" | "m4v" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "webm" => Some("video/webm"),
        _ => None,
    }
}

fn canonical_mime(mime: &str) -> String {
    let lower = mime.trim().to_ascii_lowercase();
    match lower.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        _ => lower,
    }
}

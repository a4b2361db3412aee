//! OAuth2 refresh-token client shared by refresh-capable adapters
//!
//! Only the `refresh_token` grant is implemented. Account linking, including
//! the authorization-code exchange, populates the credential store elsewhere.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::PlatformError;
use crate::types::TokenPair;

pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const TWITTER_TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// How the client authenticates itself to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// HTTP basic auth with client id and secret (Reddit, confidential Twitter apps)
    Basic,
    /// `client_id` / `client_secret` form fields (Google)
    Form,
}

#[derive(Clone)]
pub struct OAuthClient {
    provider: &'static str,
    token_url: String,
    client_id: String,
    client_secret: Option<SecretString>,
    auth: ClientAuth,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl OAuthClient {
    pub fn new(
        provider: &'static str,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        auth: ClientAuth,
        http: reqwest::Client,
    ) -> Self {
        Self {
            provider,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.map(SecretString::from),
            auth,
            http,
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// Every failure is reported as `PlatformError::Refresh`; the caller
    /// decides whether the account must be reconnected.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, PlatformError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let mut request = self.http.post(&self.token_url);
        match (self.auth, &self.client_secret) {
            (ClientAuth::Basic, Some(secret)) => {
                request = request.basic_auth(&self.client_id, Some(secret.expose_secret()));
            }
            (ClientAuth::Basic, None) => {
                // Public clients identify themselves in the body
                form.push(("client_id", &self.client_id));
            }
            (ClientAuth::Form, secret) => {
                form.push(("client_id", &self.client_id));
                if let Some(secret) = secret {
                    form.push(("client_secret", secret.expose_secret()));
                }
            }
        }

        let response = request.form(&form).send().await.map_err(|e| {
            PlatformError::Refresh(format!("{} token endpoint unreachable: {}", self.provider, e))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            PlatformError::Refresh(format!(
                "{} token response could not be read: {}",
                self.provider, e
            ))
        })?;

        parse_token_response(self.provider, status, &body)
    }
}

/// Interpret a token endpoint response
pub(crate) fn parse_token_response(
    provider: &str,
    status: u16,
    body: &str,
) -> Result<TokenPair, PlatformError> {
    let parsed: Option<TokenResponse> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let detail = parsed
            .as_ref()
            .and_then(|r| {
                r.error_description
                    .clone()
                    .or_else(|| r.error.clone())
            })
            .unwrap_or_else(|| body.trim().to_string());
        return Err(PlatformError::Refresh(format!(
            "{} refused to refresh the token (HTTP {}): {}",
            provider, status, detail
        )));
    }

    let parsed = parsed.ok_or_else(|| {
        PlatformError::Refresh(format!("{} returned an unreadable token response", provider))
    })?;

    // Reddit reports some grant errors with a 200 status
    if let Some(error) = parsed.error {
        return Err(PlatformError::Refresh(format!(
            "{} refused to refresh the token: {}",
            provider, error
        )));
    }

    match parsed.access_token {
        Some(access) if !access.is_empty() => Ok(TokenPair::new(access, parsed.refresh_token)),
        _ => Err(PlatformError::Refresh(format!(
            "{} token response carried no access token",
            provider
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotated_pair() {
        let pair = parse_token_response(
            "Twitter",
            200,
            r#"{"token_type":"bearer","access_token":"new-a","refresh_token":"new-r","expires_in":7200}"#,
        )
        .unwrap();
        assert_eq!(pair.access_token(), "new-a");
        assert_eq!(pair.refresh_token(), Some("new-r"));
    }

    #[test]
    fn test_access_only_keeps_refresh_absent() {
        let pair =
            parse_token_response("YouTube", 200, r#"{"access_token":"ya29","expires_in":3599}"#)
                .unwrap();
        assert_eq!(pair.access_token(), "ya29");
        assert_eq!(pair.refresh_token(), None);
    }

    #[test]
    fn test_invalid_grant_is_refresh_error() {
        let err = parse_token_response(
            "Twitter",
            400,
            r#"{"error":"invalid_request","error_description":"Value passed for the token was invalid."}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::Refresh(_)));
        assert!(err.message().contains("Value passed for the token was invalid"));
    }

    #[test]
    fn test_error_with_ok_status() {
        let err = parse_token_response("Reddit", 200, r#"{"error":"invalid_grant"}"#).unwrap_err();
        assert!(err.message().contains("invalid_grant"));
    }

    #[test]
    fn test_non_json_error_body_is_kept() {
        let err = parse_token_response("Reddit", 502, "Bad Gateway").unwrap_err();
        assert!(err.message().contains("HTTP 502"));
        assert!(err.message().contains("Bad Gateway"));
    }

    #[test]
    fn test_missing_access_token() {
        let err = parse_token_response("Reddit", 200, r#"{"refresh_token":"r"}"#).unwrap_err();
        assert!(err.message().contains("no access token"));
    }
}

//! X/Twitter delivery client
//!
//! Thin adapter over the v2 tweet endpoint and the v1.1 media upload
//! endpoint. Credentials come from the environment or config; the free
//! tier offers no reliable way to query remaining budget, which is why
//! the quota tracker exists on our side of this boundary.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::delivery::DeliveryClient;
use crate::error::{DeliveryError, Result};

const TWEET_URL: &str = "https://api.twitter.com/2/tweets";
const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";

pub struct TwitterClient {
    client: reqwest::Client,
    bearer_token: Option<String>,
    tweet_url: String,
    media_upload_url: String,
}

impl TwitterClient {
    pub fn new(bearer_token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            bearer_token,
            tweet_url: TWEET_URL.to_string(),
            media_upload_url: MEDIA_UPLOAD_URL.to_string(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.twitter_bearer_token(),
            Duration::from_secs(config.scheduler.request_timeout_secs),
        )
    }

    /// Point the client at a different API host (tests)
    pub fn with_endpoints(mut self, tweet_url: String, media_upload_url: String) -> Self {
        self.tweet_url = tweet_url;
        self.media_upload_url = media_upload_url;
        self
    }

    fn token(&self) -> Result<&str> {
        self.bearer_token
            .as_deref()
            .ok_or_else(|| {
                DeliveryError::Unconfigured(
                    "no bearer token set; export TWITTER_BEARER_TOKEN".to_string(),
                )
                .into()
            })
    }
}

/// Map an HTTP status from the platform onto the failure taxonomy
fn classify_status(status: u16, body: String) -> DeliveryError {
    match status {
        401 => DeliveryError::Unauthorized(body),
        403 => DeliveryError::Forbidden(body),
        429 => DeliveryError::RateLimited(body),
        _ => DeliveryError::Api(format!("HTTP {}: {}", status, body)),
    }
}

fn transport_error(context: &str, e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Network(format!("{} timed out", context))
    } else {
        DeliveryError::Network(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl DeliveryClient for TwitterClient {
    async fn post_text(&self, text: &str, media_id: Option<&str>) -> Result<String> {
        let token = self.token()?;

        let mut body = serde_json::json!({ "text": text });
        if let Some(id) = media_id {
            body["media"] = serde_json::json!({ "media_ids": [id] });
        }

        debug!(len = text.len(), has_media = media_id.is_some(), "posting tweet");

        let resp = self
            .client
            .post(&self.tweet_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("tweet request", e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "tweet rejected");
            return Err(classify_status(status, body).into());
        }

        let parsed: TweetResponse = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Api(format!("invalid tweet response: {}", e)))?;

        Ok(parsed.data.id)
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        let token = self.token()?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DeliveryError::Network(format!("failed to read media file: {}", e)))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        let resp = self
            .client
            .post(&self.media_upload_url)
            .bearer_auth(token)
            .form(&[("media_data", encoded)])
            .send()
            .await
            .map_err(|e| transport_error("media upload", e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body).into());
        }

        let parsed: MediaUploadResponse = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Api(format!("invalid upload response: {}", e)))?;

        Ok(parsed.media_id_string)
    }

    fn is_configured(&self) -> bool {
        self.bearer_token.is_some()
    }

    fn name(&self) -> &str {
        "twitter"
    }
}

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(401, String::new()),
            DeliveryError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(403, String::new()),
            DeliveryError::Forbidden(_)
        ));
        assert!(matches!(
            classify_status(429, String::new()),
            DeliveryError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(500, String::new()),
            DeliveryError::Api(_)
        ));
    }

    #[test]
    fn test_api_error_preserves_message() {
        let err = classify_status(503, "service unavailable".to_string());
        assert!(format!("{}", err).contains("503"));
        assert!(format!("{}", err).contains("service unavailable"));
    }

    #[test]
    fn test_unconfigured_without_token() {
        let client = TwitterClient::new(None, Duration::from_secs(5));
        assert!(!client.is_configured());
    }

    #[test]
    fn test_configured_with_token() {
        let client = TwitterClient::new(Some("tok-abc".to_string()), Duration::from_secs(5));
        assert!(client.is_configured());
        assert_eq!(client.name(), "twitter");
    }

    #[tokio::test]
    async fn test_post_without_token_is_unconfigured() {
        let client = TwitterClient::new(None, Duration::from_secs(5));
        let result = client.post_text("hello", None).await;
        match result {
            Err(crate::error::ChirpcastError::Delivery(DeliveryError::Unconfigured(_))) => {}
            other => panic!("expected Unconfigured, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tweet_response_parsing() {
        let json = r#"{"data":{"id":"1234567890","text":"hello"}}"#;
        let parsed: TweetResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.id, "1234567890");
    }

    #[test]
    fn test_media_response_parsing() {
        let json = r#"{"media_id":123,"media_id_string":"123","size":42}"#;
        let parsed: MediaUploadResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.media_id_string, "123");
    }
}

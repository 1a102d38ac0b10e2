//! Mock delivery client for testing
//!
//! Configurable outcomes, call counting, and captured posts, so the
//! scheduler's retry and history behavior can be verified without
//! network access or credentials. Available to all builds to support
//! integration tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::delivery::DeliveryClient;
use crate::error::{DeliveryError, Result};

/// A post captured by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPost {
    pub text: String,
    pub media_id: Option<String>,
}

#[derive(Clone)]
pub struct MockDeliveryClient {
    name: String,
    configured: bool,
    delay: Duration,
    /// Errors returned for upcoming post calls, in order; once drained,
    /// posts succeed.
    scripted_failures: Arc<Mutex<VecDeque<DeliveryError>>>,
    post_calls: Arc<Mutex<usize>>,
    upload_calls: Arc<Mutex<usize>>,
    captured: Arc<Mutex<Vec<CapturedPost>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockDeliveryClient {
    /// A mock that accepts every post
    pub fn success() -> Self {
        Self {
            name: "mock".to_string(),
            configured: true,
            delay: Duration::from_millis(0),
            scripted_failures: Arc::new(Mutex::new(VecDeque::new())),
            post_calls: Arc::new(Mutex::new(0)),
            upload_calls: Arc::new(Mutex::new(0)),
            captured: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// A mock that fails every post with the given error
    pub fn always_failing(error: DeliveryError) -> Self {
        let mock = Self::success();
        // A large script is simpler than a separate "forever" mode
        let mut failures = mock.scripted_failures.lock().unwrap();
        for _ in 0..10_000 {
            failures.push_back(error.clone());
        }
        drop(failures);
        mock
    }

    /// A mock that fails the first `n` posts, then succeeds
    pub fn failing_then_success(n: usize, error: DeliveryError) -> Self {
        let mock = Self::success();
        let mut failures = mock.scripted_failures.lock().unwrap();
        for _ in 0..n {
            failures.push_back(error.clone());
        }
        drop(failures);
        mock
    }

    /// A mock reporting no credentials
    pub fn unconfigured() -> Self {
        let mut mock = Self::always_failing(DeliveryError::Unconfigured(
            "mock has no credentials".to_string(),
        ));
        mock.configured = false;
        mock
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn post_call_count(&self) -> usize {
        *self.post_calls.lock().unwrap()
    }

    pub fn upload_call_count(&self) -> usize {
        *self.upload_calls.lock().unwrap()
    }

    pub fn captured_posts(&self) -> Vec<CapturedPost> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryClient for MockDeliveryClient {
    async fn post_text(&self, text: &str, media_id: Option<&str>) -> Result<String> {
        if self.delay > Duration::from_millis(0) {
            sleep(self.delay).await;
        }

        *self.post_calls.lock().unwrap() += 1;

        if let Some(error) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(error.into());
        }

        self.captured.lock().unwrap().push(CapturedPost {
            text: text.to_string(),
            media_id: media_id.map(|s| s.to_string()),
        });

        let mut next = self.next_id.lock().unwrap();
        let id = next.to_string();
        *next += 1;
        Ok(id)
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        *self.upload_calls.lock().unwrap() += 1;
        Ok(format!("media-{}", path.display()))
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_mock_returns_sequential_ids() {
        let mock = MockDeliveryClient::success();
        assert_eq!(mock.post_text("one", None).await.unwrap(), "1");
        assert_eq!(mock.post_text("two", None).await.unwrap(), "2");
        assert_eq!(mock.post_call_count(), 2);
        assert_eq!(mock.captured_posts().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_then_success() {
        let mock = MockDeliveryClient::failing_then_success(
            2,
            DeliveryError::Network("flaky".to_string()),
        );

        assert!(mock.post_text("x", None).await.is_err());
        assert!(mock.post_text("x", None).await.is_err());
        assert!(mock.post_text("x", None).await.is_ok());
        assert_eq!(mock.post_call_count(), 3);
        // Only the successful post is captured
        assert_eq!(mock.captured_posts().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_mock() {
        let mock = MockDeliveryClient::unconfigured();
        assert!(!mock.is_configured());

        let result = mock.post_text("x", None).await;
        match result {
            Err(crate::error::ChirpcastError::Delivery(DeliveryError::Unconfigured(_))) => {}
            other => panic!("expected Unconfigured, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_media_captured_with_post() {
        let mock = MockDeliveryClient::success();
        let media = mock.upload_media(Path::new("/tmp/img.png")).await.unwrap();
        mock.post_text("with media", Some(&media)).await.unwrap();

        let captured = mock.captured_posts();
        assert_eq!(captured[0].media_id.as_deref(), Some("media-/tmp/img.png"));
        assert_eq!(mock.upload_call_count(), 1);
    }
}

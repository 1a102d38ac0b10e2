//! Delivery client boundary
//!
//! The client wraps the external posting capability and reports what
//! the remote service said, in the categories the scheduler acts on.
//! It knows nothing about the daily quota, and it never retries
//! internally; both are scheduler policy.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

pub mod mock;
pub mod twitter;

pub use mock::MockDeliveryClient;
pub use twitter::TwitterClient;

/// Posting boundary for a single platform
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Post text (≤280 chars) with an optional previously-uploaded
    /// media attachment. Returns the external post id.
    async fn post_text(&self, text: &str, media_id: Option<&str>) -> Result<String>;

    /// Upload a local media file, returning a platform media reference
    /// usable in a subsequent `post_text`.
    async fn upload_media(&self, path: &Path) -> Result<String>;

    /// Whether real credentials are present. Placeholder/demo values
    /// count as unconfigured.
    fn is_configured(&self) -> bool;

    /// Lowercase platform identifier (e.g. "twitter")
    fn name(&self) -> &str;
}

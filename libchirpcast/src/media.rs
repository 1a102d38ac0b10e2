//! Image attachment pipeline
//!
//! A post can carry either an explicit image URL or an image prompt
//! rendered through a placeholder image service. Either way the bytes
//! are fetched to a temporary file, handed to the delivery client for
//! upload, and cleaned up when the file guard drops.

use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::delivery::DeliveryClient;
use crate::error::{DeliveryError, Result};

const PLACEHOLDER_BASE: &str = "https://placehold.co/1024x512/png";

/// Build the image URL for a post: an explicit URL wins, otherwise the
/// prompt is rendered as placeholder text.
pub fn image_url_for(image_url: Option<&str>, image_prompt: Option<&str>) -> Option<String> {
    if let Some(url) = image_url {
        if !url.trim().is_empty() {
            return Some(url.trim().to_string());
        }
    }
    let prompt = image_prompt?.trim();
    if prompt.is_empty() {
        return None;
    }
    Some(format!("{}?text={}", PLACEHOLDER_BASE, encode_text(prompt)))
}

/// Percent-free query encoding good enough for the placeholder service:
/// spaces become '+', anything outside a safe set is dropped.
fn encode_text(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            ' ' => Some('+'),
            c if c.is_ascii_alphanumeric() => Some(c),
            '-' | '_' | '.' | ',' | '!' => Some(c),
            _ => None,
        })
        .collect()
}

/// Fetch the image for a post and upload it, returning the platform
/// media id, or `None` when the post has no image.
///
/// Fetch and filesystem failures are reported as `Network` so the
/// scheduler retries them like any other transient fault.
pub async fn resolve_media(
    http: &reqwest::Client,
    delivery: &dyn DeliveryClient,
    image_url: Option<&str>,
    image_prompt: Option<&str>,
) -> Result<Option<String>> {
    let url = match image_url_for(image_url, image_prompt) {
        Some(url) => url,
        None => return Ok(None),
    };

    debug!(url = %url, "fetching image attachment");

    let resp = http
        .get(&url)
        .send()
        .await
        .map_err(|e| DeliveryError::Network(format!("image fetch failed: {}", e)))?;

    if !resp.status().is_success() {
        return Err(DeliveryError::Network(format!(
            "image fetch returned HTTP {}",
            resp.status().as_u16()
        ))
        .into());
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| DeliveryError::Network(format!("image download failed: {}", e)))?;

    // NamedTempFile removes itself on drop, on every exit path.
    let mut file = NamedTempFile::new()
        .map_err(|e| DeliveryError::Network(format!("temp file creation failed: {}", e)))?;
    file.write_all(&bytes)
        .map_err(|e| DeliveryError::Network(format!("temp file write failed: {}", e)))?;
    file.flush()
        .map_err(|e| DeliveryError::Network(format!("temp file flush failed: {}", e)))?;

    let media_id = delivery.upload_media(file.path()).await?;
    Ok(Some(media_id))
}

//! Network-capture strategy: collect the image URLs the reader requests.
//!
//! The reader fetches pages from a CDN whose URL paths encode the page
//! sequence, so lexically sorting the captured URLs approximates page
//! order. Capture itself guarantees no ordering.

use super::AcquisitionStrategy;
use crate::config::Config;
use crate::error::DownloadError;
use crate::models::{Chapter, PageTask};
use crate::renderer::RenderContext;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Collects page URLs from the session's outbound-request log.
pub struct NetworkCapture {
    image_url_pattern: String,
    image_load_delay: Duration,
}

impl NetworkCapture {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image_url_pattern: config.image_url_pattern.clone(),
            image_load_delay: Duration::from_secs(config.image_load_delay),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for NetworkCapture {
    /// Returns an empty list, not an error, when no matching requests were
    /// observed; the caller treats that as a chapter failure.
    async fn acquire(
        &self,
        context: &mut dyn RenderContext,
        chapter: &Chapter,
    ) -> Result<Vec<PageTask>, DownloadError> {
        // Let the reader issue its image requests first.
        tokio::time::sleep(self.image_load_delay).await;

        let log = context
            .captured_requests()
            .await
            .map_err(|e| DownloadError::Session(format!("request log unavailable: {e}")))?;

        let mut urls: Vec<String> = log
            .into_iter()
            .filter(|u| u.contains(&self.image_url_pattern))
            .collect();
        urls.sort();
        urls.dedup();

        debug!(
            chapter = chapter.number,
            pages = urls.len(),
            "captured image URLs"
        );

        Ok(urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| PageTask::from_url(i as u32 + 1, url))
            .collect())
    }
}

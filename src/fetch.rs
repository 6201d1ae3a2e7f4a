//! Image fetcher: turns one chapter's page tasks into files on disk.
//!
//! Inline payloads are written directly; remote locators go through a
//! shared, retried HTTP client. Work fans out over a bounded worker pool;
//! a single bad page is logged and skipped, never aborting the chapter.
//! Filenames are zero-padded so lexical and numeric ordering coincide.

use crate::config::Config;
use crate::error::DownloadError;
use crate::models::{PageSource, PageTask};
use crate::retry::RetryPolicy;
use anyhow::Context;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Extensions recognized as page images when counting saved pages.
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];

/// Fallback extension when neither content-type nor URL reveal the format.
const DEFAULT_EXTENSION: &str = "webp";

/// Delay between attempts for one page fetch.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bounded-concurrency page persister with a shared HTTP client.
pub struct ImageFetcher {
    client: reqwest::Client,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl ImageFetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            ),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            ),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&config.referer).context("invalid referer header")?,
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            max_concurrent: config.max_concurrent_images.max(1),
            // max_retries is the total attempt budget per URL, so one
            // initial attempt leaves max_retries - 1 retries.
            retry: RetryPolicy::fixed(config.max_retries.saturating_sub(1), FETCH_RETRY_DELAY),
        })
    }

    /// Persist one chapter's pages under `dir`, returning how many files
    /// were written. Individual page failures are logged, not raised.
    pub async fn save_pages(&self, tasks: &[PageTask], dir: &Path) -> Result<u32, DownloadError> {
        tokio::fs::create_dir_all(dir).await?;

        let saved = stream::iter(tasks)
            .map(|task| self.save_one(task, dir))
            .buffer_unordered(self.max_concurrent)
            .fold(0u32, |saved, outcome| async move {
                match outcome {
                    Ok(path) => {
                        debug!("wrote {}", path.display());
                        saved + 1
                    }
                    Err(e) => {
                        warn!("page skipped: {e}");
                        saved
                    }
                }
            })
            .await;

        Ok(saved)
    }

    async fn save_one(&self, task: &PageTask, dir: &Path) -> Result<PathBuf, DownloadError> {
        let (bytes, ext) = match &task.source {
            PageSource::Bytes { data, ext } => (data.clone(), ext.clone()),
            PageSource::Remote { url } => {
                self.retry
                    .run(|| self.fetch_image(url))
                    .await
                    .map_err(|e| DownloadError::TransientFetch {
                        url: url.clone(),
                        message: e.to_string(),
                    })?
            }
        };

        let path = dir.join(format!("{:03}.{ext}", task.index));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    async fn fetch_image(&self, url: &str) -> anyhow::Result<(Vec<u8>, String)> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let ext = extension_for(&content_type, url);

        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), ext))
    }
}

/// Infer a file extension from the content-type, then the URL, then the
/// default.
fn extension_for(content_type: &str, url: &str) -> String {
    if content_type.contains("webp") {
        return "webp".to_string();
    }
    if content_type.contains("jpeg") || content_type.contains("jpg") {
        return "jpg".to_string();
    }
    if content_type.contains("png") {
        return "png".to_string();
    }

    let lower = url.to_lowercase();
    if lower.contains(".webp") {
        "webp".to_string()
    } else if lower.contains(".jpg") || lower.contains(".jpeg") {
        "jpg".to_string()
    } else if lower.contains(".png") {
        "png".to_string()
    } else {
        DEFAULT_EXTENSION.to_string()
    }
}

/// Image files in a chapter directory, sorted by filename. Zero-padded
/// indices make this page order.
pub fn page_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Pages currently on disk for a chapter.
pub fn count_saved_pages(dir: &Path) -> u32 {
    page_files(dir).len() as u32
}

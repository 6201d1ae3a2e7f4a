//! Configuration loading and persistence.
//!
//! Settings live in a JSON file next to the binary (default `config.json`).
//! A missing or corrupt file silently falls back to defaults so a bad edit
//! never blocks a download run.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// How page bytes or page URLs are obtained for a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Extract rendered pixel data in the page via a batched canvas pass.
    Rendered,
    /// Intercept the image requests the reader issues and fetch them
    /// directly over HTTP.
    Network,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory downloads are written under.
    pub download_directory: String,
    /// Max chapters processed concurrently; each holds one browser tab.
    pub max_concurrent_chapters: usize,
    /// Max concurrent page downloads per chapter.
    pub max_concurrent_images: usize,
    /// Seconds to wait after navigation for the reader to populate pages.
    pub image_load_delay: u64,
    /// Retry budget for failed extractions and page fetches.
    pub max_retries: u32,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout: u64,
    /// Navigation timeout for opening a chapter reader, in seconds.
    pub navigation_timeout: u64,
    /// Which acquisition strategy to use.
    pub mode: AcquisitionMode,
    /// Allowed shortfall between expected and saved page count before a
    /// chapter is marked failed.
    pub page_tolerance: u32,
    /// Selector that signals the reader finished its initial render.
    pub reader_selector: String,
    /// Selector for per-page containers carrying a `data-page` attribute.
    pub page_selector: String,
    /// Substring identifying page image requests in the network log.
    pub image_url_pattern: String,
    /// Referer header sent with direct image fetches.
    pub referer: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_directory: "downloads".to_string(),
            max_concurrent_chapters: 3,
            max_concurrent_images: 5,
            image_load_delay: 15,
            max_retries: 3,
            request_timeout: 30,
            navigation_timeout: 30,
            mode: AcquisitionMode::Rendered,
            page_tolerance: 1,
            reader_selector: "div.reader-pages-content".to_string(),
            page_selector: "div.page-container[data-page]".to_string(),
            image_url_pattern: "akari.kagane.org/api/v2/books/file/".to_string(),
            referer: "https://kagane.org/".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file is missing or unparseable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("config file {} is corrupt ({e}), using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

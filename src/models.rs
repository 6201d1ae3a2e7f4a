//! Data model for chapters, page tasks, and per-chapter outcomes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One downloadable unit: an ordered sequence of page images behind a
/// reader URL. Immutable once handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Upstream identifier (book UUID or similar).
    pub id: String,
    /// Display number as shown by the site ("12", "12.5", ...).
    pub number: String,
    /// Chapter title, may be empty.
    pub title: String,
    /// Reader entry URL the session navigates to.
    pub url: String,
    /// Page count from chapter metadata, when the site exposes one.
    /// May be absent or approximate.
    pub expected_pages: Option<u32>,
}

impl Chapter {
    /// Directory name component for this chapter, before sanitization.
    pub fn dir_name(&self) -> String {
        format!("Chapter_{}_{}", self.number, self.title)
    }
}

/// Reader entry URL for a book within a series.
pub fn reader_url(series_id: &str, book_id: &str) -> String {
    format!("https://kagane.org/series/{series_id}/reader/{book_id}")
}

/// Where one page's bytes come from.
#[derive(Debug, Clone)]
pub enum PageSource {
    /// Pixel data already extracted in the rendering session.
    Bytes {
        data: Vec<u8>,
        /// File extension derived from the payload's mime type.
        ext: String,
    },
    /// Remote resource to fetch over HTTP; extension decided at fetch time.
    Remote { url: String },
}

/// One page to persist: a 1-based target index plus its source.
/// Created during acquisition, consumed by the fetcher, then discarded.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub index: u32,
    pub source: PageSource,
}

impl PageTask {
    pub fn from_bytes(index: u32, data: Vec<u8>, ext: impl Into<String>) -> Self {
        Self {
            index,
            source: PageSource::Bytes {
                data,
                ext: ext.into(),
            },
        }
    }

    pub fn from_url(index: u32, url: impl Into<String>) -> Self {
        Self {
            index,
            source: PageSource::Remote { url: url.into() },
        }
    }
}

/// Terminal outcome for one chapter. Produced exactly once per input
/// chapter; the sole contract between the pipeline and downstream
/// conversion, which only reads directories of successful chapters.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub chapter: Chapter,
    pub success: bool,
    /// Output directory, present even on failure (it may hold partial pages).
    pub dir: PathBuf,
    /// Pages actually on disk when the chapter reached a terminal state.
    pub pages_saved: u32,
    /// Failure cause, `None` on success.
    pub error: Option<String>,
}

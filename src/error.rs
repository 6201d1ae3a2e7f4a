//! Error types for the download pipeline.
//!
//! Failures inside one chapter's processing are always captured into that
//! chapter's [`DownloadResult`](crate::models::DownloadResult) rather than
//! propagated, so the variants here exist for callers that need to branch
//! on failure kind (retry, skip, or abort) instead of matching on strings.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Failure kinds the pipeline distinguishes.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The rendering session crashed, could not be provisioned, or failed
    /// to navigate. Fails only the affected batch slot.
    #[error("session failure: {0}")]
    Session(String),

    /// The reader never reached a ready state within its wait window.
    #[error("reader not ready after {timeout_ms}ms waiting for `{selector}`")]
    RenderTimeout { selector: String, timeout_ms: u64 },

    /// Acquisition produced zero pages for the chapter.
    #[error("no pages captured for chapter")]
    EmptyExtraction,

    /// A page fetch failed after exhausting its retry budget. Marks only
    /// that page as missing, never the whole chapter.
    #[error("fetch failed for {url}: {message}")]
    TransientFetch { url: String, message: String },

    /// Processing was skipped because the caller requested a stop.
    #[error("stopped before processing")]
    Stopped,

    /// I/O error writing page files or creating directories.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether the failure is worth another attempt at the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }
}

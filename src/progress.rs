//! Progress event types and broadcast channel for download telemetry.
//!
//! The pipeline emits [`DownloadEvent`]s after each discrete step, which
//! flow through a `tokio::sync::broadcast` channel to all subscribers
//! (CLI output, GUI bridges, logs). When no subscriber exists, events are
//! silently dropped; pipeline correctness never depends on delivery.

use serde::{Deserialize, Serialize};

/// A progress event emitted while downloading chapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    /// A batch of chapters started processing.
    BatchStarted {
        batch_index: usize,
        chapters: usize,
    },
    /// A rendering session was opened for a chapter.
    SessionOpened {
        chapter: String,
        position: usize,
        total: usize,
    },
    /// Page extraction or capture began for a chapter.
    ExtractionStarted {
        chapter: String,
        target_pages: u32,
    },
    /// Running count of pages persisted for a chapter.
    PagesSaved {
        chapter: String,
        saved: u32,
        target: u32,
    },
    /// A re-extraction pass started after a validation shortfall.
    RetryingShortfall {
        chapter: String,
        attempt: u32,
        saved: u32,
        required: u32,
    },
    /// A chapter reached a terminal state.
    ChapterFinished {
        chapter: String,
        success: bool,
        saved: u32,
    },
    /// A batch's sessions were all released.
    BatchFinished { batch_index: usize },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Sender handle for emitting progress events.
pub type ProgressSender = tokio::sync::broadcast::Sender<DownloadEvent>;

/// Receiver handle for consuming progress events.
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<DownloadEvent>;

/// Create a progress broadcast channel with a bounded buffer.
///
/// 256 events comfortably covers a batch: a handful of lifecycle events
/// per chapter plus one `PagesSaved` per page.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Emit an event, silently ignoring send errors (no receivers listening).
pub fn emit(tx: &Option<ProgressSender>, event: DownloadEvent) {
    if let Some(sender) = tx {
        let _ = sender.send(event);
    }
}

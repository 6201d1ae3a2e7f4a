//! Chapter download pipeline.
//!
//! Turns an ordered chapter list into verified on-disk page sequences:
//! chapters are partitioned into batches of `max_concurrent_chapters`,
//! each batch gets one rendering session per chapter, acquisition and
//! fetching run concurrently per chapter, results are validated against
//! the expected page count, and every chapter yields exactly one
//! [`DownloadResult`] regardless of how it failed. Sessions are never held
//! across batch boundaries.

use crate::acquisition::{self, AcquisitionStrategy};
use crate::config::Config;
use crate::error::DownloadError;
use crate::fetch::{self, ImageFetcher};
use crate::models::{Chapter, DownloadResult};
use crate::progress::{emit, DownloadEvent, ProgressSender};
use crate::renderer::Renderer;
use crate::sanitize::sanitize_filename;
use crate::session::{SessionHandle, SessionPool};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between re-extraction passes after a validation shortfall.
const SHORTFALL_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Length caps for the sanitized directory components.
const SERIES_NAME_MAX: usize = 50;
const CHAPTER_NAME_MAX: usize = 80;

/// Top-level orchestrator for chapter downloads.
pub struct ChapterPipeline {
    config: Config,
    pool: SessionPool,
    fetcher: ImageFetcher,
    strategy: Box<dyn AcquisitionStrategy>,
    progress: Option<ProgressSender>,
    stop: Arc<AtomicBool>,
}

impl ChapterPipeline {
    pub fn new(renderer: Arc<dyn Renderer>, config: Config) -> anyhow::Result<Self> {
        let pool = SessionPool::new(
            Arc::clone(&renderer),
            Duration::from_secs(config.navigation_timeout),
        );
        let fetcher = ImageFetcher::new(&config)?;
        let strategy = acquisition::strategy_for(&config);
        Ok(Self {
            config,
            pool,
            fetcher,
            strategy,
            progress: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe the pipeline's progress events to the given sender.
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Flag a caller can set to request a cooperative stop. Polled between
    /// batches and before each chapter's processing begins; an in-flight
    /// session operation always runs to completion or its own timeout.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Download all chapters, returning one result per input chapter in
    /// input order. Per-chapter failures never abort siblings or later
    /// batches.
    pub async fn download(
        &self,
        series_title: &str,
        chapters: &[Chapter],
    ) -> Vec<DownloadResult> {
        let root = PathBuf::from(&self.config.download_directory)
            .join(sanitize_filename(series_title, SERIES_NAME_MAX));
        let total = chapters.len();
        let batch_size = self.config.max_concurrent_chapters.max(1);
        let mut results = Vec::with_capacity(total);

        for (batch_index, batch) in chapters.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;

            if self.stopped() {
                info!("stop requested, skipping remaining {} chapters", total - offset);
                for chapter in &chapters[offset..] {
                    results.push(self.skipped_result(chapter, &root));
                }
                break;
            }

            emit(
                &self.progress,
                DownloadEvent::BatchStarted {
                    batch_index,
                    chapters: batch.len(),
                },
            );

            let urls: Vec<String> = batch.iter().map(|c| c.url.clone()).collect();
            let slots = self.pool.acquire_batch(&urls).await;

            let work = batch
                .iter()
                .zip(slots)
                .enumerate()
                .map(|(i, (chapter, slot))| {
                    self.process_chapter(chapter, slot, &root, offset + i + 1, total)
                });
            let outcomes = join_all(work).await;

            let mut handles = Vec::new();
            for (result, handle) in outcomes {
                results.push(result);
                if let Some(h) = handle {
                    handles.push(h);
                }
            }
            // All chapters in the batch are terminal; give the tabs back
            // before the next batch opens any.
            self.pool.release_batch(handles).await;

            emit(&self.progress, DownloadEvent::BatchFinished { batch_index });
        }

        results
    }

    /// Process one chapter inside a batch slot. Returns the chapter's
    /// result together with its session handle (when one was opened) so
    /// the caller can release the whole batch at once.
    async fn process_chapter(
        &self,
        chapter: &Chapter,
        slot: Result<SessionHandle, DownloadError>,
        root: &Path,
        position: usize,
        total: usize,
    ) -> (DownloadResult, Option<SessionHandle>) {
        let dir = root.join(sanitize_filename(&chapter.dir_name(), CHAPTER_NAME_MAX));

        if self.stopped() {
            return (self.skipped_result(chapter, root), slot.ok());
        }

        let mut handle = match slot {
            Ok(h) => h,
            Err(e) => {
                warn!(chapter = chapter.number, "session slot failed: {e}");
                emit(
                    &self.progress,
                    DownloadEvent::Warning {
                        message: format!("chapter {}: {e}", chapter.number),
                    },
                );
                return (self.failed_result(chapter, dir, 0, e.to_string()), None);
            }
        };

        emit(
            &self.progress,
            DownloadEvent::SessionOpened {
                chapter: chapter.number.clone(),
                position,
                total,
            },
        );

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            return (
                self.failed_result(chapter, dir, 0, format!("cannot create chapter dir: {e}")),
                Some(handle),
            );
        }

        let expected = chapter.expected_pages.filter(|&p| p > 0);
        let min_required =
            expected.map_or(1, |e| e.saturating_sub(self.config.page_tolerance).max(1));

        let mut attempt = 0u32;
        let mut last_error: Option<String> = None;
        let mut saved;

        loop {
            let mut fatal = false;
            match self.strategy.acquire(handle.context_mut(), chapter).await {
                Ok(tasks) if !tasks.is_empty() => {
                    emit(
                        &self.progress,
                        DownloadEvent::ExtractionStarted {
                            chapter: chapter.number.clone(),
                            target_pages: expected.unwrap_or(tasks.len() as u32),
                        },
                    );
                    if let Err(e) = self.fetcher.save_pages(&tasks, &dir).await {
                        last_error = Some(e.to_string());
                    }
                }
                Ok(_) => {
                    last_error = Some(DownloadError::EmptyExtraction.to_string());
                }
                Err(e) => {
                    // A reader that never came up or a dead tab will not
                    // improve on a re-run within this session.
                    fatal = matches!(
                        e,
                        DownloadError::RenderTimeout { .. } | DownloadError::Session(_)
                    );
                    last_error = Some(e.to_string());
                }
            }

            saved = fetch::count_saved_pages(&dir);
            emit(
                &self.progress,
                DownloadEvent::PagesSaved {
                    chapter: chapter.number.clone(),
                    saved,
                    target: expected.unwrap_or(saved),
                },
            );

            if saved >= min_required || fatal || attempt >= self.config.max_retries {
                break;
            }
            attempt += 1;
            emit(
                &self.progress,
                DownloadEvent::RetryingShortfall {
                    chapter: chapter.number.clone(),
                    attempt,
                    saved,
                    required: min_required,
                },
            );
            tokio::time::sleep(SHORTFALL_RETRY_DELAY).await;
        }

        let success = saved >= min_required;
        emit(
            &self.progress,
            DownloadEvent::ChapterFinished {
                chapter: chapter.number.clone(),
                success,
                saved,
            },
        );

        let result = DownloadResult {
            chapter: chapter.clone(),
            success,
            dir,
            pages_saved: saved,
            error: if success {
                None
            } else {
                Some(last_error.unwrap_or_else(|| {
                    format!("saved {saved} of {min_required} required pages")
                }))
            },
        };
        (result, Some(handle))
    }

    fn skipped_result(&self, chapter: &Chapter, root: &Path) -> DownloadResult {
        self.failed_result(
            chapter,
            root.join(sanitize_filename(&chapter.dir_name(), CHAPTER_NAME_MAX)),
            0,
            DownloadError::Stopped.to_string(),
        )
    }

    fn failed_result(
        &self,
        chapter: &Chapter,
        dir: PathBuf,
        pages_saved: u32,
        error: String,
    ) -> DownloadResult {
        DownloadResult {
            chapter: chapter.clone(),
            success: false,
            dir,
            pages_saved,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionMode;
    use crate::progress;
    use crate::testutil::{MockContext, MockRenderer};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn chapter(n: u32, expected: Option<u32>) -> Chapter {
        Chapter {
            id: format!("b{n}"),
            number: n.to_string(),
            title: format!("Chapter {n}"),
            url: format!("https://kagane.org/series/s1/reader/b{n}"),
            expected_pages: expected,
        }
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.download_directory = dir.display().to_string();
        config.image_load_delay = 0;
        config.max_retries = 0;
        config
    }

    fn data_url(bytes: &[u8]) -> String {
        format!("data:image/png;base64,{}", BASE64.encode(bytes))
    }

    /// JS handler for a reader that renders `pages` extractable pages.
    fn reader_with_pages(pages: u32) -> impl Fn(&str) -> anyhow::Result<serde_json::Value> {
        move |script: &str| {
            if script.starts_with("!!document.querySelector") {
                Ok(json!(true))
            } else if script.ends_with(".length") {
                Ok(json!(pages))
            } else {
                let entries: Vec<serde_json::Value> = (1..=pages)
                    .map(|p| json!({ "page": p, "data": data_url(format!("page-{p}").as_bytes()) }))
                    .collect();
                Ok(json!(entries))
            }
        }
    }

    fn pipeline(renderer: Arc<MockRenderer>, config: Config) -> ChapterPipeline {
        ChapterPipeline::new(renderer, config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_chapters_split_into_batches_of_three_and_two() {
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(MockRenderer::new(|_| {
            MockContext::new().with_js(reader_with_pages(2))
        }));
        let log = Arc::clone(&renderer.log);

        let chapters: Vec<Chapter> = (1..=5).map(|n| chapter(n, Some(2))).collect();
        let results = pipeline(Arc::clone(&renderer), test_config(out.path()))
            .download("Test Series", &chapters)
            .await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(log.max_live(), 3);
        assert_eq!(log.live(), 0);

        // Every batch-1 session is released before any batch-2 session opens
        let events = log.events();
        let open_fourth = events.iter().position(|e| e == "open:3").unwrap();
        for i in 0..3 {
            let closed = events.iter().position(|e| *e == format!("close:{i}")).unwrap();
            assert!(closed < open_fourth, "session {i} still open at batch 2: {events:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_tolerance_boundary() {
        let out = tempfile::tempdir().unwrap();
        // Reader claims 24 containers but only 23 pages ever extract
        let renderer = Arc::new(MockRenderer::new(|_| {
            MockContext::new().with_js(|script| {
                if script.starts_with("!!document.querySelector") {
                    Ok(json!(true))
                } else if script.ends_with(".length") {
                    Ok(json!(24))
                } else {
                    let entries: Vec<serde_json::Value> = (1..=23)
                        .map(|p| json!({ "page": p, "data": data_url(b"x") }))
                        .collect();
                    Ok(json!(entries))
                }
            })
        }));

        let results = pipeline(renderer, test_config(out.path()))
            .download("Series", &[chapter(1, Some(24))])
            .await;
        assert!(results[0].success, "23 of 24 is within the one-page tolerance");
        assert_eq!(results[0].pages_saved, 23);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_shortfall_beyond_tolerance_fails() {
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(MockRenderer::new(|_| {
            MockContext::new().with_js(|script| {
                if script.starts_with("!!document.querySelector") {
                    Ok(json!(true))
                } else if script.ends_with(".length") {
                    Ok(json!(24))
                } else {
                    let entries: Vec<serde_json::Value> = (1..=22)
                        .map(|p| json!({ "page": p, "data": data_url(b"x") }))
                        .collect();
                    Ok(json!(entries))
                }
            })
        }));

        let results = pipeline(renderer, test_config(out.path()))
            .download("Series", &[chapter(1, Some(24))])
            .await;
        assert!(!results[0].success, "22 of 24 exceeds the one-page tolerance");
        assert_eq!(results[0].pages_saved, 22);
        assert!(results[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_network_capture_fails_chapter_without_aborting() {
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(MockRenderer::new(|_| {
            // Only non-image traffic observed
            MockContext::new().with_requests(&["https://kagane.org/assets/app.js"])
        }));

        let mut config = test_config(out.path());
        config.mode = AcquisitionMode::Network;

        let results = pipeline(renderer, config)
            .download("Series", &[chapter(1, None), chapter(2, None)])
            .await;

        assert_eq!(results.len(), 2, "pipeline must continue past the failure");
        for r in &results {
            assert!(!r.success);
            assert_eq!(r.pages_saved, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_failure_does_not_affect_siblings() {
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(MockRenderer::new(|index| {
            if index == 0 {
                MockContext::new().failing_navigation("tab crashed")
            } else {
                MockContext::new().with_js(reader_with_pages(1))
            }
        }));

        let chapters: Vec<Chapter> = (1..=3).map(|n| chapter(n, Some(1))).collect();
        let results = pipeline(renderer, test_config(out.path()))
            .download("Series", &chapters)
            .await;

        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("session failure"));
        assert!(results[1].success);
        assert!(results[2].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_skips_all_chapters() {
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(MockRenderer::passing());
        let p = pipeline(renderer, test_config(out.path()));
        p.stop_flag().store(true, Ordering::Relaxed);

        let chapters: Vec<Chapter> = (1..=4).map(|n| chapter(n, None)).collect();
        let results = p.download("Series", &chapters).await;

        assert_eq!(results.len(), 4, "every chapter still gets a result");
        for (i, r) in results.iter().enumerate() {
            assert!(!r.success);
            assert_eq!(r.chapter.number, (i + 1).to_string());
            assert!(r.error.as_deref().unwrap().contains("stopped"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shortfall_retry_recovers_missing_pages() {
        let out = tempfile::tempdir().unwrap();
        let extractions = Arc::new(AtomicU32::new(0));
        let extractions_in = Arc::clone(&extractions);

        let renderer = Arc::new(MockRenderer::new(move |_| {
            let counter = Arc::clone(&extractions_in);
            MockContext::new().with_js(move |script| {
                if script.starts_with("!!document.querySelector") {
                    Ok(json!(true))
                } else if script.ends_with(".length") {
                    Ok(json!(2))
                } else {
                    // First two passes (initial + in-strategy retry) miss
                    // page 2; the pipeline's re-extraction then finds it.
                    let call = counter.fetch_add(1, Ordering::SeqCst);
                    if call < 2 {
                        Ok(json!([
                            { "page": 1, "data": data_url(b"one") },
                            { "page": 2, "data": null },
                        ]))
                    } else {
                        Ok(json!([
                            { "page": 1, "data": data_url(b"one") },
                            { "page": 2, "data": data_url(b"two") },
                        ]))
                    }
                }
            })
        }));

        let (tx, mut rx) = progress::channel();
        let mut config = test_config(out.path());
        config.max_retries = 2;
        // No tolerance: both pages are required, so the first pass's
        // single page forces a re-extraction.
        config.page_tolerance = 0;

        let results = pipeline(renderer, config)
            .with_progress(tx)
            .download("Series", &[chapter(1, Some(2))])
            .await;

        assert!(results[0].success);
        assert_eq!(results[0].pages_saved, 2);

        let mut saw_retry = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, DownloadEvent::RetryingShortfall { .. }) {
                saw_retry = true;
            }
        }
        assert!(saw_retry, "shortfall retry should have been reported");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_produces_identical_file_set() {
        let out = tempfile::tempdir().unwrap();
        let make_renderer = || {
            Arc::new(MockRenderer::new(|_| {
                MockContext::new().with_js(reader_with_pages(2))
            }))
        };

        let chapters = [chapter(1, Some(2))];
        let first = pipeline(make_renderer(), test_config(out.path()))
            .download("Series", &chapters)
            .await;
        let files_first: Vec<_> = fetch::page_files(&first[0].dir)
            .iter()
            .map(|p| (p.clone(), std::fs::read(p).unwrap()))
            .collect();

        let second = pipeline(make_renderer(), test_config(out.path()))
            .download("Series", &chapters)
            .await;
        let files_second: Vec<_> = fetch::page_files(&second[0].dir)
            .iter()
            .map(|p| (p.clone(), std::fs::read(p).unwrap()))
            .collect();

        assert_eq!(first[0].dir, second[0].dir);
        assert_eq!(files_first, files_second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_directory_layout() {
        let out = tempfile::tempdir().unwrap();
        let renderer = Arc::new(MockRenderer::new(|_| {
            MockContext::new().with_js(reader_with_pages(1))
        }));

        let ch = Chapter {
            id: "b1".to_string(),
            number: "2".to_string(),
            title: "A/B: C?".to_string(),
            url: "https://kagane.org/series/s1/reader/b1".to_string(),
            expected_pages: Some(1),
        };
        let results = pipeline(renderer, test_config(out.path()))
            .download("My: Series?", &[ch])
            .await;

        let expected_dir = out
            .path()
            .join("My_ Series")
            .join("Chapter_2_A_B_ C");
        assert_eq!(results[0].dir, expected_dir);
        assert!(expected_dir.join("001.png").exists());
    }
}

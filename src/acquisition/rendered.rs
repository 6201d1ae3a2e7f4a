//! Rendered-capture strategy: extract page pixel data in the page itself.
//!
//! The reader decodes pages into `<img>` elements backed by blob URLs, so
//! the bytes never appear in the network log in usable form. One batched
//! JS pass draws every page image onto a canvas and returns data URLs;
//! pages whose images have not decoded yet come back null and are retried
//! with increasing delays, restricted to the still-missing indices.

use super::AcquisitionStrategy;
use crate::config::Config;
use crate::error::DownloadError;
use crate::models::{Chapter, PageTask};
use crate::renderer::RenderContext;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to wait for the reader root element to appear.
const READER_WAIT: Duration = Duration::from_secs(30);
/// Poll interval while waiting for the reader root.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn data_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^data:image/(\w+);base64,(.+)$").expect("data-url regex"))
}

/// One entry of the batched extraction result.
#[derive(Debug, Deserialize)]
struct ExtractedPage {
    page: Option<u32>,
    data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Extracts rendered page images via a batched canvas pass.
pub struct RenderedCapture {
    reader_selector: String,
    page_selector: String,
    image_load_delay: Duration,
    retry: RetryPolicy,
}

impl RenderedCapture {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reader_selector: config.reader_selector.clone(),
            page_selector: config.page_selector.clone(),
            image_load_delay: Duration::from_secs(config.image_load_delay),
            retry: RetryPolicy::extraction(config.max_retries),
        }
    }

    /// Poll until the reader root exists in the DOM.
    async fn wait_for_reader(&self, context: &dyn RenderContext) -> Result<(), DownloadError> {
        let script = format!("!!document.querySelector({})", js_string(&self.reader_selector));
        let deadline = Instant::now() + READER_WAIT;
        loop {
            if let Ok(value) = context.execute_js(&script).await {
                if value.as_bool().unwrap_or(false) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(DownloadError::RenderTimeout {
                    selector: self.reader_selector.clone(),
                    timeout_ms: READER_WAIT.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Number of page containers currently in the DOM.
    async fn rendered_page_count(&self, context: &dyn RenderContext) -> u32 {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(&self.page_selector)
        );
        match context.execute_js(&script).await {
            Ok(value) => value.as_u64().unwrap_or(0) as u32,
            Err(e) => {
                warn!("page count query failed: {e}");
                0
            }
        }
    }

    /// The batched extraction script. `targets` restricts the pass to the
    /// given page indices; `None` extracts every rendered page.
    fn extraction_script(&self, targets: Option<&[u32]>) -> String {
        let selector = js_string(&self.page_selector);
        let targets_js = targets
            .map(|t| serde_json::to_string(t).unwrap_or_else(|_| "null".to_string()))
            .unwrap_or_else(|| "null".to_string());
        format!(
            r#"(() => {{
    const targetPages = {targets_js};
    const containers = document.querySelectorAll({selector});
    const results = [];
    for (const container of containers) {{
        const pageNum = parseInt(container.getAttribute('data-page'));
        if (targetPages && !targetPages.includes(pageNum)) continue;
        const img = container.querySelector('img');
        if (img && img.src) {{
            try {{
                const canvas = document.createElement('canvas');
                canvas.width = img.naturalWidth || img.width;
                canvas.height = img.naturalHeight || img.height;
                const ctx = canvas.getContext('2d');
                ctx.drawImage(img, 0, 0);
                results.push({{ page: pageNum, data: canvas.toDataURL('image/png') }});
            }} catch (e) {{
                results.push({{ page: pageNum, data: null, error: e.message }});
            }}
        }}
    }}
    return results;
}})()"#
        )
    }

    /// Run one extraction pass, decoding successes into `pages`.
    /// Returns the indices that failed this pass.
    async fn collect(
        &self,
        context: &dyn RenderContext,
        targets: Option<&[u32]>,
        pages: &mut BTreeMap<u32, (Vec<u8>, String)>,
    ) -> Vec<u32> {
        let script = self.extraction_script(targets);
        let value = match context.execute_js(&script).await {
            Ok(v) => v,
            Err(e) => {
                warn!("extraction pass failed: {e}");
                return targets.map(|t| t.to_vec()).unwrap_or_default();
            }
        };

        let results: Vec<ExtractedPage> = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("unexpected extraction result shape: {e}");
                return targets.map(|t| t.to_vec()).unwrap_or_default();
            }
        };

        let mut failed = Vec::new();
        for entry in results {
            let Some(index) = entry.page else { continue };
            match entry.data.as_deref().and_then(decode_data_url) {
                Some((bytes, ext)) => {
                    pages.insert(index, (bytes, ext));
                }
                None => {
                    if let Some(reason) = entry.error {
                        debug!(index, reason, "page not extractable yet");
                    }
                    failed.push(index);
                }
            }
        }
        failed
    }
}

#[async_trait]
impl AcquisitionStrategy for RenderedCapture {
    async fn acquire(
        &self,
        context: &mut dyn RenderContext,
        chapter: &Chapter,
    ) -> Result<Vec<PageTask>, DownloadError> {
        self.wait_for_reader(context).await?;

        // Give the reader time to decode its blob images.
        tokio::time::sleep(self.image_load_delay).await;

        let rendered = self.rendered_page_count(context).await;
        let expected = chapter.expected_pages.filter(|&p| p > 0);
        // The DOM sometimes carries more pages than the listing claims.
        let target = expected.map_or(rendered, |e| e.max(rendered));
        debug!(
            chapter = chapter.number,
            rendered, target, "starting rendered extraction"
        );

        let mut pages: BTreeMap<u32, (Vec<u8>, String)> = BTreeMap::new();
        let mut failed = self.collect(context, None, &mut pages).await;

        for attempt in 0..self.retry.max_retries {
            if failed.is_empty() {
                break;
            }
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            let still_failed = self.collect(context, Some(&failed), &mut pages).await;
            if still_failed.len() >= failed.len() {
                // The missing set stopped shrinking; further passes would
                // only repeat themselves. Report what was captured.
                failed = still_failed;
                break;
            }
            failed = still_failed;
        }

        if pages.is_empty() {
            return Err(DownloadError::EmptyExtraction);
        }
        if !failed.is_empty() {
            warn!(
                chapter = chapter.number,
                missing = failed.len(),
                "extraction finished with missing pages"
            );
        }

        Ok(pages
            .into_iter()
            .map(|(index, (data, ext))| PageTask::from_bytes(index, data, ext))
            .collect())
    }
}

/// Decode a `data:image/<fmt>;base64,...` URL into bytes and an extension.
fn decode_data_url(data_url: &str) -> Option<(Vec<u8>, String)> {
    let caps = data_url_re().captures(data_url)?;
    let ext = match &caps[1] {
        "jpeg" => "jpg".to_string(),
        other => other.to_string(),
    };
    let bytes = BASE64.decode(&caps[2]).ok()?;
    Some((bytes, ext))
}

/// Quote a string as a JS string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

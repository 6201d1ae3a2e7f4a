//! Test doubles for the renderer traits.
//!
//! A scriptable context plus a renderer that records open/close ordering
//! and the high-water mark of simultaneously live contexts, so pipeline
//! tests can assert the session concurrency bounds without a browser.

use crate::renderer::{NavigationResult, RenderContext, Renderer};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type JsHandler = dyn Fn(&str) -> Result<serde_json::Value> + Send + Sync;

/// Records context lifecycle across a test run.
#[derive(Default)]
pub struct ContextLog {
    live: AtomicUsize,
    max_live: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl ContextLog {
    pub fn opened(&self, index: usize) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("open:{index}"));
    }

    pub fn closed(&self, index: usize) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("close:{index}"));
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

/// A scriptable browser context.
pub struct MockContext {
    js: Arc<JsHandler>,
    requests: Vec<String>,
    fail_navigation: Option<String>,
    index: usize,
    log: Option<Arc<ContextLog>>,
}

impl Default for MockContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContext {
    pub fn new() -> Self {
        Self {
            js: Arc::new(|_| Ok(serde_json::Value::Null)),
            requests: Vec::new(),
            fail_navigation: None,
            index: 0,
            log: None,
        }
    }

    /// Answer every `execute_js` call with `handler(script)`.
    pub fn with_js<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.js = Arc::new(handler);
        self
    }

    /// Pre-load the captured request log.
    pub fn with_requests(mut self, urls: &[&str]) -> Self {
        self.requests = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    /// Make navigation fail with the given message.
    pub fn failing_navigation(mut self, message: &str) -> Self {
        self.fail_navigation = Some(message.to_string());
        self
    }
}

#[async_trait]
impl RenderContext for MockContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        if let Some(msg) = &self.fail_navigation {
            bail!("{msg}");
        }
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        (self.js)(script)
    }

    async fn captured_requests(&self) -> Result<Vec<String>> {
        Ok(self.requests.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if let Some(log) = &self.log {
            log.closed(self.index);
        }
        Ok(())
    }
}

type ContextFactory = dyn Fn(usize) -> MockContext + Send + Sync;

/// A renderer producing scripted contexts from a factory keyed by creation
/// order.
pub struct MockRenderer {
    factory: Arc<ContextFactory>,
    created: AtomicUsize,
    pub log: Arc<ContextLog>,
}

impl MockRenderer {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(usize) -> MockContext + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            created: AtomicUsize::new(0),
            log: Arc::new(ContextLog::default()),
        }
    }

    /// Renderer whose every context succeeds with default behavior.
    pub fn passing() -> Self {
        Self::new(|_| MockContext::new())
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let index = self.created.fetch_add(1, Ordering::SeqCst);
        let mut ctx = (self.factory)(index);
        ctx.index = index;
        ctx.log = Some(Arc::clone(&self.log));
        self.log.opened(index);
        Ok(Box::new(ctx))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.log.live()
    }
}

//! Session pool: lifecycle of a bounded set of rendering sessions.
//!
//! One session (browser tab) is handed to each chapter in a batch and torn
//! down when the batch finishes. Every live session is recorded in a
//! process-wide registry so a termination handler can see what is still
//! open and force-clean via [`Renderer::shutdown`], which kills the
//! browser and with it any orphaned tab.

use crate::error::DownloadError;
use crate::renderer::{RenderContext, Renderer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a graceful session teardown may take before being abandoned.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One rendering session bound to exactly one chapter for the lifetime of
/// a batch slot. Owned exclusively by the pool's caller until released.
pub struct SessionHandle {
    /// Registry id, unique for the process lifetime.
    pub id: u64,
    context: Box<dyn RenderContext>,
}

impl SessionHandle {
    /// The underlying browser context.
    pub fn context_mut(&mut self) -> &mut dyn RenderContext {
        self.context.as_mut()
    }
}

/// Manages a bounded set of concurrent rendering sessions.
pub struct SessionPool {
    renderer: Arc<dyn Renderer>,
    navigation_timeout: Duration,
}

impl SessionPool {
    pub fn new(renderer: Arc<dyn Renderer>, navigation_timeout: Duration) -> Self {
        Self {
            renderer,
            navigation_timeout,
        }
    }

    /// Open one session per URL and navigate it to its chapter's entry
    /// point. A navigation timeout or crash becomes an error on that slot;
    /// it never aborts the rest of the batch. The caller bounds the batch
    /// size, so at most `max_concurrent_chapters` sessions are ever live.
    pub async fn acquire_batch(
        &self,
        urls: &[String],
    ) -> Vec<Result<SessionHandle, DownloadError>> {
        let mut slots = Vec::with_capacity(urls.len());
        for url in urls {
            slots.push(self.acquire_one(url).await);
        }
        slots
    }

    async fn acquire_one(&self, url: &str) -> Result<SessionHandle, DownloadError> {
        let mut context = self
            .renderer
            .new_context()
            .await
            .map_err(|e| DownloadError::Session(format!("failed to open tab: {e}")))?;

        let nav = context
            .navigate(url, self.navigation_timeout.as_millis() as u64)
            .await;

        if let Err(e) = nav {
            // The tab exists but is useless; tear it down before reporting
            // the slot failure.
            let _ = tokio::time::timeout(TEARDOWN_TIMEOUT, context.close()).await;
            return Err(DownloadError::Session(format!(
                "navigation to {url} failed: {e}"
            )));
        }

        let id = registry::register(url);
        debug!(id, url, "session opened");
        Ok(SessionHandle { id, context })
    }

    /// Tear down all sessions in a batch, swallowing individual teardown
    /// errors. Always completes: a teardown that hangs past its timeout is
    /// abandoned to the browser-level kill at shutdown.
    pub async fn release_batch(&self, handles: Vec<SessionHandle>) {
        for handle in handles {
            let id = handle.id;
            match tokio::time::timeout(TEARDOWN_TIMEOUT, handle.context.close()).await {
                Ok(Ok(())) => debug!(id, "session closed"),
                Ok(Err(e)) => warn!(id, "session close failed: {e}"),
                Err(_) => warn!(id, "session close timed out, abandoning tab"),
            }
            registry::deregister(id);
        }
    }
}

/// Process-wide tracked-session registry.
///
/// Init-on-first-use behind a `OnceLock`; all mutation goes through one
/// mutex because batches may run on different executor threads. Cleared
/// by the termination path after the renderer is shut down.
pub mod registry {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, OnceLock};

    /// What we know about one live session.
    #[derive(Debug, Clone)]
    pub struct SessionRecord {
        pub url: String,
    }

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn sessions() -> &'static Mutex<HashMap<u64, SessionRecord>> {
        static REGISTRY: OnceLock<Mutex<HashMap<u64, SessionRecord>>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
    }

    /// Record a live session, returning its registry id.
    pub fn register(url: &str) -> u64 {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut map = sessions().lock().expect("session registry poisoned");
        map.insert(
            id,
            SessionRecord {
                url: url.to_string(),
            },
        );
        id
    }

    /// Remove a session from the registry once it has been torn down.
    pub fn deregister(id: u64) {
        let mut map = sessions().lock().expect("session registry poisoned");
        map.remove(&id);
    }

    /// Snapshot of sessions still recorded as live.
    pub fn active() -> Vec<(u64, SessionRecord)> {
        let map = sessions().lock().expect("session registry poisoned");
        map.iter().map(|(id, rec)| (*id, rec.clone())).collect()
    }

    /// Forget all sessions. Called after the browser itself has been
    /// killed, at which point every recorded tab is already gone.
    pub fn clear() {
        let mut map = sessions().lock().expect("session registry poisoned");
        map.clear();
    }
}

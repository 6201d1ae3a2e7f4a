//! Page acquisition strategies.
//!
//! Two ways of obtaining a chapter's pages from a rendering session:
//! extracting rendered pixel data in-page ([`rendered`]) or intercepting
//! the image requests the reader issues ([`network`]). Both are given a
//! navigated session and produce page tasks for the fetcher; selection is
//! by configuration, not inheritance.

pub mod network;
pub mod rendered;

use crate::config::{AcquisitionMode, Config};
use crate::error::DownloadError;
use crate::models::{Chapter, PageTask};
use crate::renderer::RenderContext;
use async_trait::async_trait;

/// Obtains page bytes or page URLs for one chapter.
///
/// The context has already been navigated to the chapter's reader URL.
/// A partial capture is a valid `Ok` result; the pipeline validates the
/// count against the chapter's expectation.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    async fn acquire(
        &self,
        context: &mut dyn RenderContext,
        chapter: &Chapter,
    ) -> Result<Vec<PageTask>, DownloadError>;
}

/// Build the strategy the configuration selects.
pub fn strategy_for(config: &Config) -> Box<dyn AcquisitionStrategy> {
    match config.mode {
        AcquisitionMode::Rendered => Box::new(rendered::RenderedCapture::from_config(config)),
        AcquisitionMode::Network => Box::new(network::NetworkCapture::from_config(config)),
    }
}

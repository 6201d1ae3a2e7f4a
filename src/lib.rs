//! kagane-dl library — concurrent chapter image downloader.
//!
//! Chapters are processed in bounded batches, each driving one headless
//! Chromium tab. Pages are acquired either by extracting rendered pixel
//! data in the page or by intercepting the reader's image requests, then
//! persisted as zero-padded page files.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod retry;
pub mod sanitize;
pub mod session;

#[cfg(test)]
pub mod testutil;

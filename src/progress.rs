//! Progress-callback trait for page and chapter events.
//!
//! Inject an [`Arc<dyn AudiobookProgressCallback>`] via
//! [`crate::config::AudiobookConfigBuilder::progress_callback`] to observe a
//! run as it happens.
//!
//! # Example
//!
//! ```rust
//! use pdf2audiobook::{AudiobookConfig, AudiobookProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ChapterCounter(AtomicUsize);
//!
//! impl AudiobookProgressCallback for ChapterCounter {
//!     fn on_chapter_complete(&self, chapter: u32, _track: &std::path::Path) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chapter {chapter} ready");
//!     }
//! }
//!
//! let config = AudiobookConfig::builder()
//!     .progress_callback(Arc::new(ChapterCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as pages and chapters complete.
///
/// Pages are processed concurrently, so every method may be called from
/// several tasks at once. All methods default to no-ops.
pub trait AudiobookProgressCallback: Send + Sync {
    /// Called once before any page work starts.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page enters the pipeline.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page track has been written.
    ///
    /// * `chunk_count`: number of synthesis chunks the page was split into
    fn on_page_complete(&self, page_num: usize, total_pages: usize, chunk_count: usize) {
        let _ = (page_num, total_pages, chunk_count);
    }

    /// Called when a page fails at any stage.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called when a chapter track has been written.
    fn on_chapter_complete(&self, chapter: u32, track: &Path) {
        let _ = (chapter, track);
    }

    /// Called when a chapter cannot be assembled.
    fn on_chapter_failed(&self, chapter: u32, failed_pages: &[usize]) {
        let _ = (chapter, failed_pages);
    }

    /// Called once after every page and chapter has been settled.
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AudiobookProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AudiobookConfig`].
pub type ProgressCallback = Arc<dyn AudiobookProgressCallback>;

//! Progress-callback trait for generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::GeneratorConfigBuilder::progress_callback`] to receive
//! events as the avatar and each storybook page are generated.
//!
//! # Example
//!
//! ```rust
//! use storybook_forge::{GenerationProgressCallback, GeneratorConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page_num}/{total_pages} done ({done} so far)");
//!     }
//! }
//!
//! let config = GeneratorConfig::builder()
//!     .api_key("sk-or-test")
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the Generation Client as work progresses.
///
/// Page events fire from concurrently running futures, so they may arrive in
/// any order. All methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called before the avatar request is sent.
    fn on_avatar_start(&self) {}

    /// Called once the avatar image has been extracted.
    fn on_avatar_complete(&self) {}

    /// Called once the page list is known, before any page request is sent.
    fn on_storybook_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when work on a page begins (1-indexed), including pages that
    /// need no request.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page image is ready.
    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page fails. The storybook as a whole will fail.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page succeeded.
    fn on_storybook_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GeneratorConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

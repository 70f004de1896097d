//! Progress-callback trait for batch and per-file events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as the queue moves each file through upload and conversion.
//!
//! Callbacks fire for the synchronous transitions made by the batch loop.
//! Pushed server events that only nudge a file's percentage are reported
//! through [`BatchProgressCallback::on_item_progress`].
//!
//! # Example
//!
//! ```rust
//! use fily_convert::{BatchProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, position: usize, total: usize, name: &str, _download_ref: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} done", position, total, name);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::item::ItemStatus;
use std::sync::Arc;

/// Called by the batch queue as it processes each file.
///
/// `position` is 1-indexed within the current run; `total` is the number of
/// files queued when the run started, raised if more are queued mid-run.
/// All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first file of a run is uploaded.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a file's upload request is sent.
    fn on_item_start(&self, position: usize, total: usize, name: &str) {
        let _ = (position, total, name);
    }

    /// Called when a file enters a new stage (`uploading`, `converting`).
    fn on_item_stage(&self, position: usize, total: usize, name: &str, status: ItemStatus) {
        let _ = (position, total, name, status);
    }

    /// Called when a pushed server event raises a file's percentage.
    fn on_item_progress(&self, name: &str, percent: u8) {
        let _ = (name, percent);
    }

    /// Called when a file converts successfully.
    fn on_item_complete(&self, position: usize, total: usize, name: &str, download_ref: &str) {
        let _ = (position, total, name, download_ref);
    }

    /// Called when a file's upload or conversion fails.
    fn on_item_error(&self, position: usize, total: usize, name: &str, error: &str) {
        let _ = (position, total, name, error);
    }

    /// Called once after the run ends.
    fn on_batch_complete(&self, processed: usize, succeeded: usize) {
        let _ = (processed, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_item_start(1, 2, "a.docx");
        cb.on_item_stage(1, 2, "a.docx", ItemStatus::Converting);
        cb.on_item_progress("a.docx", 40);
        cb.on_item_complete(1, 2, "a.docx", "http://x/download/1");
        cb.on_item_error(2, 2, "b.png", "Upload failed");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(3);
        cb.on_item_progress("c.xlsx", 90);
    }
}

//! Progress-callback trait for per-image analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events while a batch runs. Callers can forward them to a channel, a UI or
//! a terminal progress bar without the library knowing how.
//!
//! # Example
//!
//! ```rust
//! use fieldscan::{AnalysisConfig, AnalysisProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     records: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, _index: usize, _label: &str, records: usize) {
//!         self.records.fetch_add(records, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { records: AtomicUsize::new(0) });
//! let config = AnalysisConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the analysis pipeline as it processes each image.
///
/// Implementations must be `Send + Sync`: images in a batch are analysed
/// concurrently, so methods may be called from several tasks at once. All
/// methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before the first image of a batch.
    fn on_batch_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called when an image starts normalisation.
    fn on_image_start(&self, index: usize, label: &str) {
        let _ = (index, label);
    }

    /// Called before each backoff sleep.
    ///
    /// # Arguments
    /// * `retry`: 1-based retry number
    /// * `delay`: how long the request will wait
    /// * `reason`: display text of the transient failure
    fn on_image_retry(&self, index: usize, label: &str, retry: u32, delay: Duration, reason: &str) {
        let _ = (index, label, retry, delay, reason);
    }

    /// Called when an image produced records.
    fn on_image_complete(&self, index: usize, label: &str, records: usize) {
        let _ = (index, label, records);
    }

    /// Called when an image failed terminally.
    fn on_image_error(&self, index: usize, label: &str, error: &str) {
        let _ = (index, label, error);
    }

    /// Called once after the last image of a batch.
    fn on_batch_complete(&self, total_images: usize, succeeded: usize) {
        let _ = (total_images, succeeded);
    }
}

/// No-op implementation.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Shared callback handle.
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopProgressCallback>();
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(3);
        cb.on_image_retry(0, "a.jpg", 1, Duration::from_secs(2), "429");
        cb.on_batch_complete(3, 3);
    }
}

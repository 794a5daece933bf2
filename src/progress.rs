//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the controller walks through the stages.
//!
//! # Example
//!
//! ```rust
//! use market_digest::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: &str, output_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done ({output_len} chars)");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline controller as it runs each stage.
///
/// Implementations must be `Send + Sync`: with translation concurrency above
/// one, translation events may arrive from several tasks at once. All methods
/// default to no-ops so callers only override what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before the first stage, with the number of stages planned
    /// (search, summarize, format, one per translation, deliver).
    fn on_run_start(&self, total_stages: usize) {
        let _ = total_stages;
    }

    /// Called just before a stage's first attempt.
    fn on_stage_start(&self, stage: &str, index: usize, total_stages: usize) {
        let _ = (stage, index, total_stages);
    }

    /// Called before each retry of a stage (`attempt` is 1-based, so the
    /// first retry reports 2).
    fn on_stage_retry(&self, stage: &str, attempt: u32, error: &str) {
        let _ = (stage, attempt, error);
    }

    /// Called when a stage succeeds.
    fn on_stage_complete(&self, stage: &str, output_len: usize) {
        let _ = (stage, output_len);
    }

    /// Called when a stage exhausts its retries.
    fn on_stage_error(&self, stage: &str, error: &str) {
        let _ = (stage, error);
    }

    /// Called once after the run finished or aborted.
    fn on_run_complete(&self, succeeded: bool) {
        let _ = succeeded;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        retries: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: &str, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_retry(&self, _stage: &str, _attempt: u32, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: &str, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_error(&self, _stage: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(7);
        cb.on_stage_start("search", 1, 7);
        cb.on_stage_retry("search", 2, "429");
        cb.on_stage_complete("search", 42);
        cb.on_stage_error("format", "boom");
        cb.on_run_complete(false);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_start("search", 1, 3);
        tracker.on_stage_complete("search", 100);
        tracker.on_stage_start("summarize", 2, 3);
        tracker.on_stage_retry("summarize", 2, "timeout");
        tracker.on_stage_error("summarize", "gave up");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(5);
        cb.on_stage_complete("deliver", 0);
    }
}

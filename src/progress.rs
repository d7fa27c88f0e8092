//! Progress-callback trait for per-stage run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves a run through its stages. The CLI uses
//! this to drive its spinner; a host application can forward the events to
//! a job table or a websocket.
//!
//! # Example
//!
//! ```rust
//! use edgequake_course2video::{PipelineConfig, RunProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, _run_id: &str, _stage: Stage, _message: &str) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(cb as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{RunStatus, Stage};
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// Runs execute concurrently in the worker, so implementations must be
/// `Send + Sync`. All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// Called once when the run starts.
    fn on_run_start(&self, run_id: &str) {
        let _ = run_id;
    }

    /// Called before a stage executes.
    fn on_stage_start(&self, run_id: &str, stage: Stage) {
        let _ = (run_id, stage);
    }

    /// Called when a stage succeeds, with its report line.
    fn on_stage_complete(&self, run_id: &str, stage: Stage, message: &str) {
        let _ = (run_id, stage, message);
    }

    /// Called when a stage fails, with a human-readable error.
    fn on_stage_error(&self, run_id: &str, stage: Stage, error: &str) {
        let _ = (run_id, stage, error);
    }

    /// Called once after cleanup and notification.
    fn on_run_complete(&self, run_id: &str, status: RunStatus) {
        let _ = (run_id, status);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

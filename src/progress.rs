//! Progress-callback trait for job lifecycle events.
//!
//! Pass an [`Arc<dyn JobProgressCallback>`] to
//! [`crate::controller::JobController::new`] to receive events as the
//! controller drives a job. This is the whole contract with the
//! presentation layer: a terminal bar, a GUI, or a log forwarder all sit
//! behind the same trait and the state machine never knows which.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfjob::{JobProgressCallback, Phase};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct PhaseLog(Mutex<Vec<Phase>>);
//!
//! impl JobProgressCallback for PhaseLog {
//!     fn on_phase_change(&self, phase: Phase) {
//!         self.0.lock().unwrap().push(phase);
//!     }
//! }
//!
//! let log = PhaseLog::default();
//! log.on_phase_change(Phase::Uploading);
//! assert_eq!(log.0.lock().unwrap().as_slice(), &[Phase::Uploading]);
//! ```

use crate::history::HistoryEntry;
use crate::job::{Phase, QueueSnapshot};
use std::sync::Arc;
use std::time::Duration;

/// Called by the controller as a job moves through its lifecycle.
///
/// Implementations must be `Send + Sync`: events come from whichever task is
/// driving the job, and the history expiry timer fires from its own task.
/// All methods have default no-op implementations.
pub trait JobProgressCallback: Send + Sync {
    /// The job entered `phase`. Progress restarts at 0.
    fn on_phase_change(&self, phase: Phase) {
        let _ = phase;
    }

    /// Measured progress for the current phase, 0–100.
    fn on_progress(&self, phase: Phase, percent: u8) {
        let _ = (phase, percent);
    }

    /// Queue position changed; `None` when the job left the queue.
    fn on_queue_update(&self, snapshot: Option<QueueSnapshot>) {
        let _ = snapshot;
    }

    /// Display-only countdown to the next capacity re-check.
    ///
    /// # Arguments
    /// * `remaining` : time left before the re-check fires
    /// * `attempt`   : consecutive denials so far (1-based)
    fn on_countdown(&self, remaining: Duration, attempt: u32) {
        let _ = (remaining, attempt);
    }

    /// A non-fatal warning the user should see (e.g. imminent artifact expiry).
    fn on_warning(&self, message: &str) {
        let _ = message;
    }

    /// An artifact was saved locally.
    fn on_saved(&self, file_name: &str, bytes: u64) {
        let _ = (file_name, bytes);
    }

    /// The history ledger changed; `entries` is the full current list.
    fn on_history_update(&self, entries: &[HistoryEntry]) {
        let _ = entries;
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type the controller stores.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

/// Integer percentage of `done` over `total`, clamped to 0–100.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

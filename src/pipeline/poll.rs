//! Status polling.
//!
//! Polls are strictly sequential: the next request is scheduled only after
//! the previous response has been handled, so one job never has two polls
//! in flight however slow the service gets.

use crate::api::{JobApi, ServerPhase, StatusReport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shown when the service reports `error` without saying why.
pub const GENERIC_FAILURE: &str = "Processing failed on the server";

/// How a polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Finished,
    Failed(String),
    Cancelled,
}

/// Poll `job_id` every `interval` until `finished` or `error`.
///
/// Every report, terminal or not, is passed to `on_report` first. A
/// transport failure ends polling with [`PollOutcome::Failed`]; it is never
/// retried, so a wedged job cannot hide behind a flaky connection.
pub async fn poll_until_terminal(
    api: &dyn JobApi,
    job_id: &str,
    interval: Duration,
    cancel: &CancellationToken,
    mut on_report: impl FnMut(&StatusReport),
) -> PollOutcome {
    let mut polls: u64 = 0;
    loop {
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            result = api.status(job_id) => result,
        };
        polls += 1;

        let report = match report {
            Ok(r) => r,
            Err(e) => {
                warn!("Status poll {} for job {} failed: {}", polls, job_id, e);
                return PollOutcome::Failed(format!("Lost contact with the server: {e}"));
            }
        };
        debug!(
            "Job {} poll {}: {:?} {}%",
            job_id, polls, report.phase, report.progress
        );
        on_report(&report);

        match report.phase {
            ServerPhase::Finished => return PollOutcome::Finished,
            ServerPhase::Error => {
                let message = report
                    .error
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                return PollOutcome::Failed(message);
            }
            ServerPhase::Unknown => {
                warn!("Job {}: unrecognised status tag, keeping current phase", job_id);
            }
            _ => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

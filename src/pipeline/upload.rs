//! Upload: stream the file and the chunk-size field to the service.
//!
//! Progress is reported as an integer percentage of bytes sent, and only
//! when that integer changes, so a 200 MB upload produces at most 101
//! events rather than one per socket write.
//!
//! A 503 means capacity vanished between the admission check and the
//! upload. That is not a failure: the caller goes back to waiting and later
//! resubmits the whole file. There is no partial-upload resume.

use crate::api::{JobApi, Submission, SubmitOutcome, TransferProgress};
use crate::progress::percent;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// How an upload attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted(String),
    CapacityLost,
    Failed(String),
}

/// Upload `submission`, reporting 0–100 through `on_progress`.
pub async fn upload(
    api: &dyn JobApi,
    submission: &Submission,
    on_progress: impl Fn(u8) + Send + Sync + 'static,
) -> UploadOutcome {
    info!(
        "Uploading '{}' ({} bytes, chunk size {})",
        submission.file_name, submission.size, submission.chunk_size
    );

    let last = Arc::new(AtomicU8::new(0));
    let progress: TransferProgress = Arc::new(move |sent, total| {
        let Some(total) = total else { return };
        let pct = percent(sent, total);
        if last.swap(pct, Ordering::Relaxed) != pct {
            on_progress(pct);
        }
    });

    match api.submit(submission, progress).await {
        Ok(SubmitOutcome::Accepted { job_id }) => {
            info!("Upload accepted, job id {}", job_id);
            UploadOutcome::Accepted(job_id)
        }
        Ok(SubmitOutcome::CapacityLost) => UploadOutcome::CapacityLost,
        Ok(SubmitOutcome::Rejected { status, message }) => {
            warn!("Upload rejected with HTTP {}: {}", status, message);
            UploadOutcome::Failed(message)
        }
        Err(e) => {
            warn!("Upload failed: {}", e);
            UploadOutcome::Failed(format!("Upload failed: {e}"))
        }
    }
}

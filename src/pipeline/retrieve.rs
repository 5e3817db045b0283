//! Artifact retrieval: download, save, clean up.
//!
//! The same sequence serves the automatic download right after `finished`
//! and every manual retry afterwards. Only a successful save triggers the
//! server-side cleanup; a failed or expired fetch leaves the service alone.

use crate::api::{DownloadOutcome, JobApi, TransferProgress};
use crate::output::ArtifactSink;
use crate::progress::percent;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a retrieval attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    Saved { path: PathBuf, bytes: u64 },
    /// The service no longer has the artifact.
    Expired,
    Failed(String),
}

/// Fetch `job_id`'s artifact and save it as `file_name`.
///
/// `on_progress` receives 0–100 only when the response declares its length;
/// without one the download still runs to completion, silently.
pub async fn retrieve(
    api: &Arc<dyn JobApi>,
    sink: &dyn ArtifactSink,
    job_id: &str,
    file_name: &str,
    on_progress: impl Fn(u8) + Send + Sync + 'static,
) -> Retrieval {
    let last = Arc::new(AtomicU8::new(0));
    let progress: TransferProgress = Arc::new(move |received, total| {
        let Some(total) = total else { return };
        let pct = percent(received, total);
        if last.swap(pct, Ordering::Relaxed) != pct {
            on_progress(pct);
        }
    });

    let bytes = match api.download(job_id, progress).await {
        Ok(DownloadOutcome::Artifact(bytes)) => bytes,
        Ok(DownloadOutcome::Expired) => {
            warn!("Artifact for job {} has expired on the server", job_id);
            return Retrieval::Expired;
        }
        Err(e) => {
            warn!("Download for job {} failed: {}", job_id, e);
            return Retrieval::Failed(e.to_string());
        }
    };

    let size = bytes.len() as u64;
    match sink.save(file_name, bytes).await {
        Ok(path) => {
            info!("Retrieved job {} → {}", job_id, path.display());
            spawn_cleanup(Arc::clone(api), job_id.to_string());
            Retrieval::Saved { path, bytes: size }
        }
        Err(e) => {
            warn!("Could not save artifact for job {}: {}", job_id, e);
            Retrieval::Failed(e.to_string())
        }
    }
}

/// Ask the service to delete `job_id` without waiting for the answer.
/// The outcome is logged and otherwise ignored.
pub fn spawn_cleanup(api: Arc<dyn JobApi>, job_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        match api.cleanup(&job_id).await {
            Ok(()) => debug!("Cleaned up job {} on the server", job_id),
            Err(e) => warn!("Cleanup for job {} failed: {}", job_id, e),
        }
    })
}

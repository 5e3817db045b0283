//! Error types for the edgequake-pdfjob library.
//!
//! Three distinct error types reflect three distinct failure surfaces:
//!
//! * [`JobError`]: returned by [`crate::controller::JobController`]
//!   operations that are refused or fail *outside* a job run: bad chunk size,
//!   a second submission while one is in flight, a manual download on an
//!   entry whose window has closed.
//!
//! * [`ApiError`]: a transport or decoding failure talking to the remote
//!   queue service. Inside a job run these never escape as `Err`; the
//!   controller folds them into the terminal `error` phase with one message.
//!
//! * [`SaveError`]: the local [`crate::output::ArtifactSink`] could not
//!   persist a downloaded artifact.
//!
//! A job that fails server-side is *not* an `Err`: `submit` returns the final
//! [`crate::job::Job`] whose phase is `Error` and whose `message` explains why.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Client-side validation ────────────────────────────────────────────
    /// Submission rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// The source file could not be read.
    #[error("Cannot read '{path}': {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Lifecycle misuse ──────────────────────────────────────────────────
    /// A job is already in flight; wait for it to finish and acknowledge it.
    #[error("A job is already in progress (phase: {phase})")]
    Busy { phase: String },

    /// Acknowledge called while the job is still running.
    #[error("Job is still active (phase: {phase}); abort it or wait for it to finish")]
    NotTerminal { phase: String },

    // ── Manual retrieval ──────────────────────────────────────────────────
    /// No history entry with this id exists in the current session.
    #[error("History entry #{0} does not exist")]
    UnknownEntry(u64),

    /// The manual-download affordance was already cleared (retrieved or expired).
    #[error("No manual download is available for entry #{0}; the download window has closed")]
    NoOutstandingDownload(u64),

    /// The server purged the artifact before it was retrieved.
    #[error("The processed file has expired on the server. Please upload the file again.")]
    ArtifactExpired,

    /// A manual download attempt failed for another reason; it may be retried.
    #[error("Download failed: {0}")]
    DownloadFailed(String),
}

/// Failures talking to the remote job-queue service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, reset, DNS failure, body stream aborted.
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The request exceeded the configured timeout.
    #[error("Request to '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Non-success status the caller has no dedicated outcome for.
    #[error("Server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not the JSON shape we expect.
    #[error("Malformed response from '{url}': {reason}")]
    Decode { url: String, reason: String },

    /// Reading the local source file while streaming it failed.
    #[error("Failed to read upload source '{path}': {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The artifact sink could not write a downloaded file.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The derived name would escape the output directory.
    #[error("Refusing to save artifact under unsafe name '{0}'")]
    UnsafeName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_display_names_phase() {
        let e = JobError::Busy {
            phase: "uploading".into(),
        };
        assert!(e.to_string().contains("uploading"), "got: {e}");
    }

    #[test]
    fn expired_display_asks_for_reupload() {
        let msg = JobError::ArtifactExpired.to_string();
        assert!(msg.contains("upload the file again"), "got: {msg}");
    }

    #[test]
    fn status_display_carries_server_message() {
        let e = ApiError::Status {
            status: 415,
            message: "Invalid file type".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("415"));
        assert!(msg.contains("Invalid file type"));
    }

    #[test]
    fn timeout_display() {
        let e = ApiError::Timeout {
            url: "http://localhost/api/status/1".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
    }
}

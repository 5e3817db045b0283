//! The remote job-queue service as seen by the client.
//!
//! [`JobApi`] is the seam between the lifecycle state machine and the wire.
//! [`HttpJobApi`] is the production implementation; tests script their own.
//! Only the fields the client needs to drive its transitions are modelled.

pub mod http;

pub use http::HttpJobApi;

use crate::error::ApiError;
use crate::job::{ChunkSize, Phase, QueueSnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Byte-level progress sink: `(transferred, total)`. `total` is `None` when
/// the peer did not declare a length.
pub type TransferProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Services send `null` for "nothing to say"; treat it like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Answer to "may a file of this size start now?".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// The file fits the server's size ceiling at all.
    pub allowed: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_file_size: u64,
    /// The queue has room right now.
    #[serde(default, deserialize_with = "null_as_default")]
    pub queue_available: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Suggested wait before re-checking, in seconds.
    #[serde(default, rename = "retry_after")]
    pub retry_after_secs: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queue_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active_jobs: u32,
}

impl AdmissionDecision {
    /// The job may be uploaded immediately.
    pub fn is_admitted(&self) -> bool {
        self.allowed && self.queue_available
    }

    /// Stand-in denial for an upload that bounced because capacity vanished.
    pub(crate) fn capacity_lost() -> Self {
        Self {
            allowed: true,
            queue_available: false,
            message: "Server capacity was taken while uploading".to_string(),
            ..Default::default()
        }
    }
}

/// What the client uploads.
#[derive(Debug, Clone)]
pub struct Submission {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub chunk_size: ChunkSize,
}

/// Result of a completed upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { job_id: String },
    /// Capacity disappeared between admission and upload; wait and resubmit.
    CapacityLost,
    /// Any other refusal, with the server's message when it gave one.
    Rejected { status: u16, message: String },
}

/// Coarse phase tag as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerPhase {
    Queued,
    Uploading,
    Splitting,
    #[serde(alias = "watermarking")]
    AddingWatermarks,
    Merging,
    #[serde(alias = "completed")]
    Finished,
    #[serde(alias = "failed")]
    Error,
    #[serde(other)]
    Unknown,
}

impl ServerPhase {
    /// Local phase this tag maps onto; `None` for tags we do not recognise.
    pub fn to_phase(self) -> Option<Phase> {
        match self {
            ServerPhase::Queued => Some(Phase::Queued),
            ServerPhase::Uploading => Some(Phase::Uploading),
            ServerPhase::Splitting => Some(Phase::Splitting),
            ServerPhase::AddingWatermarks => Some(Phase::Watermarking),
            ServerPhase::Merging => Some(Phase::Merging),
            ServerPhase::Finished => Some(Phase::Finished),
            ServerPhase::Error => Some(Phase::Error),
            ServerPhase::Unknown => None,
        }
    }
}

/// One status poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "status")]
    pub phase: ServerPhase,
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: u8,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub jobs_ahead: Option<u32>,
    #[serde(default, rename = "estimated_wait")]
    pub estimated_wait_secs: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    /// Queue payload, when the service included a position.
    pub fn queue_snapshot(&self) -> Option<QueueSnapshot> {
        self.queue_position.map(|position| QueueSnapshot {
            position,
            jobs_ahead: self.jobs_ahead.unwrap_or(position.saturating_sub(1)),
            estimated_wait_secs: self.estimated_wait_secs.unwrap_or(0),
        })
    }
}

/// Result of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Artifact(Bytes),
    /// The service purged the artifact (retention window passed).
    Expired,
}

/// Operations the lifecycle needs from the remote service.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Idempotent, side-effect free admission query.
    async fn check_admission(&self, file_size: u64) -> Result<AdmissionDecision, ApiError>;

    /// Stream the file; `progress` is called as bytes leave the client.
    async fn submit(
        &self,
        submission: &Submission,
        progress: TransferProgress,
    ) -> Result<SubmitOutcome, ApiError>;

    async fn status(&self, job_id: &str) -> Result<StatusReport, ApiError>;

    /// Fetch the artifact; `progress` is called as bytes arrive.
    async fn download(
        &self,
        job_id: &str,
        progress: TransferProgress,
    ) -> Result<DownloadOutcome, ApiError>;

    /// Ask the service to delete server-side state for `job_id`.
    async fn cleanup(&self, job_id: &str) -> Result<(), ApiError>;
}

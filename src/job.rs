//! The job model: one file submission and the phase it is in.
//!
//! [`Phase`] is the single source of truth for what the presentation layer
//! shows and what the controller does next. Server-reported phases map onto
//! it one-to-one; only `Idle`, `CheckingAdmission`, `QueueWaiting` and
//! `Downloading` are entered locally.

use crate::error::JobError;
use crate::history::EntryId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Lifecycle phase of the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Idle,
    CheckingAdmission,
    /// Waiting client-side for the service to report free capacity.
    QueueWaiting,
    /// Admitted and uploaded; waiting in the server's own queue.
    Queued,
    Uploading,
    Splitting,
    Watermarking,
    Merging,
    Downloading,
    Finished,
    Error,
}

impl Phase {
    /// `Finished` or `Error`: the job is over and awaits acknowledgment.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Error)
    }

    /// Any phase in which a job is running and may be aborted.
    pub fn is_active(self) -> bool {
        !matches!(self, Phase::Idle) && !self.is_terminal()
    }

    /// Phases whose `progress` field carries a measured percentage.
    pub fn is_measurable(self) -> bool {
        matches!(self, Phase::Uploading | Phase::Downloading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::CheckingAdmission => "checking-admission",
            Phase::QueueWaiting => "queue-waiting",
            Phase::Queued => "queued",
            Phase::Uploading => "uploading",
            Phase::Splitting => "splitting",
            Phase::Watermarking => "watermarking",
            Phase::Merging => "merging",
            Phase::Downloading => "downloading",
            Phase::Finished => "finished",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated, strictly positive chunk size sent with the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSize(u32);

impl ChunkSize {
    pub fn new(n: u32) -> Result<Self, JobError> {
        if n == 0 {
            return Err(JobError::Validation(
                "Chunk size must be a positive whole number".into(),
            ));
        }
        Ok(Self(n))
    }

    /// Parse raw user input. Empty, zero, negative, fractional and
    /// non-numeric values are all rejected.
    pub fn parse(input: &str) -> Result<Self, JobError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(JobError::Validation("Chunk size is required".into()));
        }
        let n: i64 = s.parse().map_err(|_| {
            JobError::Validation(format!(
                "Chunk size must be a positive whole number, got '{s}'"
            ))
        })?;
        if n <= 0 {
            return Err(JobError::Validation(format!(
                "Chunk size must be a positive whole number, got {n}"
            )));
        }
        let n = u32::try_from(n).map_err(|_| {
            JobError::Validation(format!("Chunk size {n} is too large"))
        })?;
        Self::new(n)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side queue position, present only while the job is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub position: u32,
    pub jobs_ahead: u32,
    pub estimated_wait_secs: u64,
}

/// The unit of work for one file submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Server-assigned identifier; `None` until the upload is accepted.
    pub id: Option<String>,
    pub original_name: String,
    pub derived_name: String,
    pub chunk_size: ChunkSize,
    pub phase: Phase,
    /// 0–100; meaningful only while [`Phase::is_measurable`].
    pub progress: u8,
    pub queue: Option<QueueSnapshot>,
    /// Terminal error text, or the abort notice.
    pub message: Option<String>,
    /// Artifact-expiry warning shown after an auto-download failure.
    pub warning: Option<String>,
    /// Ledger row written for this job once it reached a terminal state.
    pub history_entry: Option<EntryId>,
    /// Whether the manual-download affordance is currently offered.
    pub manual_download: bool,
}

impl Job {
    pub fn new(original_name: impl Into<String>, suffix: &str, chunk_size: ChunkSize) -> Self {
        let original_name = original_name.into();
        let derived_name = derive_name(&original_name, suffix);
        Self {
            id: None,
            original_name,
            derived_name,
            chunk_size,
            phase: Phase::CheckingAdmission,
            progress: 0,
            queue: None,
            message: None,
            warning: None,
            history_entry: None,
            manual_download: false,
        }
    }

    /// Move to `phase`, resetting progress. A no-op when already there so
    /// repeated poll reports do not zero a running percentage.
    pub(crate) fn enter(&mut self, phase: Phase) -> bool {
        if self.phase == phase {
            return false;
        }
        self.phase = phase;
        self.progress = 0;
        if !matches!(phase, Phase::QueueWaiting | Phase::Queued) {
            self.queue = None;
        }
        true
    }

    /// Record the server id. Ids are assigned once and never replaced.
    pub(crate) fn assign_id(&mut self, id: String) {
        if self.id.is_none() {
            self.id = Some(id);
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.enter(Phase::Error);
        self.message = Some(message.into());
        self.manual_download = false;
    }
}

/// Insert `suffix` before the extension of `original`.
///
/// `report.pdf` → `report_watermarked.pdf`; `README` → `README_watermarked`.
/// A leading dot (`.hidden`) is part of the stem, not an extension.
pub fn derive_name(original: &str, suffix: &str) -> String {
    let file_name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(original);
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = file_name.split_at(dot);
            format!("{stem}{suffix}{ext}")
        }
        _ => format!("{file_name}{suffix}"),
    }
}

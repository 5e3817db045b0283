//! Admission: turn a raw [`AdmissionDecision`] into what the lifecycle does next.

use crate::api::{AdmissionDecision, JobApi};
use crate::error::ApiError;
use tracing::debug;

/// Minutes suggested in the "too busy" message when the server gives no hint.
const DEFAULT_BUSY_RETRY_MINUTES: u64 = 5;

/// What a decision means for the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Upload now.
    Granted,
    /// No room right now, but the queue is short enough to wait in.
    Wait,
    /// Terminal: file too large, or queue at/over the ceiling.
    Rejected(String),
}

/// Ask the service about a file of `file_size` bytes.
pub async fn check(api: &dyn JobApi, file_size: u64) -> Result<AdmissionDecision, ApiError> {
    debug!("Checking admission for {} bytes", file_size);
    api.check_admission(file_size).await
}

/// Classify a decision against the client's queue ceiling.
///
/// Size is checked before capacity: an inadmissible file is rejected even
/// when the queue happens to be empty.
pub fn classify(decision: &AdmissionDecision, file_size: u64, queue_ceiling: u32) -> Admission {
    if !decision.allowed {
        return Admission::Rejected(too_large_message(decision, file_size));
    }
    if decision.queue_available {
        return Admission::Granted;
    }
    if decision.queue_count >= queue_ceiling {
        return Admission::Rejected(busy_message(decision));
    }
    Admission::Wait
}

fn too_large_message(decision: &AdmissionDecision, file_size: u64) -> String {
    if !decision.message.trim().is_empty() {
        return decision.message.clone();
    }
    if decision.max_file_size > 0 {
        format!(
            "File is too large ({}); the server accepts files up to {}",
            format_bytes(file_size),
            format_bytes(decision.max_file_size)
        )
    } else {
        "File was rejected by the server".to_string()
    }
}

/// "Server too busy" text with a whole number of minutes, at least 1.
pub fn busy_message(decision: &AdmissionDecision) -> String {
    let minutes = decision
        .retry_after_secs
        .map(|s| s.div_ceil(60).max(1))
        .unwrap_or(DEFAULT_BUSY_RETRY_MINUTES);
    format!(
        "Server too busy ({} jobs queued). Please retry after {} minute{}.",
        decision.queue_count,
        minutes,
        if minutes == 1 { "" } else { "s" }
    )
}

/// Human-readable byte count, e.g. `12.4 MB`.
pub fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

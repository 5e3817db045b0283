//! # edgequake-pdfjob
//!
//! Client side of a capacity-limited PDF processing service: split a PDF
//! into chunks, watermark every page, merge it back, and bring the result
//! home.
//!
//! The service runs few jobs at a time and keeps a bounded queue. This crate
//! owns everything the client has to get right around that: asking for
//! capacity before uploading, waiting politely when there is none, streaming
//! the upload, following the job as the service reports it, fetching the
//! artifact, and keeping a manual fallback alive for as long as the service
//! still holds the file.
//!
//! ## Lifecycle
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Admission  may a file this size start now?
//!  ├─ 2. Queue      no room: re-check after 5 s, then every 15 s
//!  ├─ 3. Upload     stream file + chunk size, get a job id
//!  ├─ 4. Poll       mirror server phase and progress once a second
//!  ├─ 5. Retrieve   download, save, ask the server to clean up
//!  └─ 6. History    ledger entry; manual download for 60 s if step 5 failed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfjob::{ClientConfig, JobController, NoopProgressCallback, Phase};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("http://localhost:8000")
//!         .output_dir("out")
//!         .build()?;
//!     let controller = JobController::http(config, Arc::new(NoopProgressCallback))?;
//!
//!     let job = controller.submit("report.pdf", "10").await?;
//!     match job.phase {
//!         Phase::Finished => println!("saved {}", job.derived_name),
//!         _ => eprintln!("failed: {}", job.message.unwrap_or_default()),
//!     }
//!     controller.acknowledge()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfjob` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdfjob = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{
    AdmissionDecision, DownloadOutcome, HttpJobApi, JobApi, ServerPhase, StatusReport,
    SubmitOutcome, Submission, TransferProgress,
};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use controller::{expiry_warning, JobController, ABORT_MESSAGE, EXPIRED_MESSAGE};
pub use error::{ApiError, JobError, SaveError};
pub use history::{EntryId, HistoryEntry, HistoryLedger};
pub use job::{derive_name, ChunkSize, Job, Phase, QueueSnapshot};
pub use output::{ArtifactSink, DirectorySink};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};

//! The lifecycle controller: one job at a time, from admission to history.
//!
//! ## State machine
//!
//! ```text
//!   idle ──submit──▶ checking-admission ──granted──────────────┐
//!                        │        │                            ▼
//!                        │        └──no room──▶ queue-waiting ──▶ uploading
//!                        │                        ▲    │          │   │
//!                        ▼                        └─503┼──────────┘   │
//!                      error ◀──rejected / busy───────┘               ▼
//!                        ▲                       queued / splitting / watermarking / merging
//!                        │                                            │
//!                        ├──server error / transport / expired──◀─────┤
//!                        │                                            ▼
//!   abort (any active) ──┘                                       downloading ──▶ finished
//!
//!   finished | error ──acknowledge──▶ idle
//! ```
//!
//! ## Stale writers
//!
//! Every run gets a generation number and a [`CancellationToken`]. All
//! writes from a run go through [`JobController::update`], which drops the
//! write unless the generation is still current and the token is still
//! live. Abort cancels the token; acknowledge cancels it and bumps the
//! generation. After either, nothing the old run does can touch state.
//!
//! Lock order is controller state, then history ledger. Progress callbacks
//! are never invoked while the controller lock is held.

use crate::api::{AdmissionDecision, HttpJobApi, JobApi, StatusReport, Submission};
use crate::config::ClientConfig;
use crate::error::{ApiError, JobError};
use crate::history::{EntryId, HistoryLedger};
use crate::job::{ChunkSize, Job, Phase, QueueSnapshot};
use crate::output::{ArtifactSink, DirectorySink};
use crate::pipeline::admission::{self, Admission};
use crate::pipeline::poll::{self, PollOutcome};
use crate::pipeline::queue::{self, WaitOutcome};
use crate::pipeline::retrieve::{self, Retrieval};
use crate::pipeline::upload::{self, UploadOutcome};
use crate::progress::ProgressCallback;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Message left on a job the user aborted.
pub const ABORT_MESSAGE: &str = "Aborted by user";

/// Message for an artifact the service already purged.
pub const EXPIRED_MESSAGE: &str =
    "The processed file has expired on the server. Please upload the file again.";

/// Warning shown after the automatic download failed.
pub fn expiry_warning(window: Duration) -> String {
    format!(
        "Automatic download failed. The processed file will be deleted from the server soon; \
         download it manually within {} seconds.",
        window.as_secs()
    )
}

/// Drives one job at a time through the remote queue.
///
/// Cheap to clone; clones share the same job and history. Call
/// [`submit`](Self::submit) on one task and [`abort`](Self::abort) from
/// another to interrupt it.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn JobApi>,
    sink: Arc<dyn ArtifactSink>,
    config: ClientConfig,
    callback: ProgressCallback,
    history: HistoryLedger,
    state: Mutex<RunState>,
}

struct RunState {
    job: Option<Job>,
    generation: u64,
    cancel: CancellationToken,
    /// Last acknowledged job, so a `submit` that lost the race with
    /// `acknowledge` can still return what happened.
    retired: Option<(u64, Job)>,
}

impl JobController {
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn JobApi>,
        sink: Arc<dyn ArtifactSink>,
        callback: ProgressCallback,
    ) -> Self {
        let history = HistoryLedger::new(config.manual_download_window(), Arc::clone(&callback));
        Self {
            inner: Arc::new(Inner {
                api,
                sink,
                config,
                callback,
                history,
                state: Mutex::new(RunState {
                    job: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                    retired: None,
                }),
            }),
        }
    }

    /// Controller over HTTP that saves artifacts into `config.output_dir`.
    pub fn http(config: ClientConfig, callback: ProgressCallback) -> Result<Self, ApiError> {
        let api: Arc<dyn JobApi> = Arc::new(HttpJobApi::new(&config)?);
        let sink: Arc<dyn ArtifactSink> = Arc::new(DirectorySink::new(config.output_dir.clone()));
        Ok(Self::new(config, api, sink, callback))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.inner.history
    }

    /// The current job, or `None` when idle.
    pub fn snapshot(&self) -> Option<Job> {
        let state = self.lock();
        state.job.clone().map(|job| self.with_affordance(job))
    }

    pub fn phase(&self) -> Phase {
        self.lock()
            .job
            .as_ref()
            .map(|j| j.phase)
            .unwrap_or(Phase::Idle)
    }

    // ── Operations ───────────────────────────────────────────────────────

    /// Run one job for the file at `path` to a terminal state.
    ///
    /// `chunk_size` is the raw user input; it is validated before anything
    /// else happens. Returns `Err` only when the submission is refused
    /// client-side. A job that fails server-side, or is aborted, returns
    /// `Ok` with `phase == Phase::Error`.
    pub async fn submit(&self, path: impl AsRef<Path>, chunk_size: &str) -> Result<Job, JobError> {
        let chunk_size = ChunkSize::parse(chunk_size)?;
        self.ensure_idle()?;

        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| JobError::FileUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        if !meta.is_file() {
            return Err(JobError::Validation(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                JobError::Validation(format!("'{}' has no usable file name", path.display()))
            })?;

        let template = Job::new(file_name.clone(), &self.inner.config.name_suffix, chunk_size);
        let derived_name = template.derived_name.clone();
        let (generation, cancel) = {
            let mut state = self.lock();
            if let Some(current) = &state.job {
                return Err(JobError::Busy {
                    phase: current.phase.to_string(),
                });
            }
            state.generation += 1;
            state.cancel = CancellationToken::new();
            state.job = Some(template.clone());
            (state.generation, state.cancel.clone())
        };

        info!(
            "Job {}: submitting '{}' ({} bytes, chunk size {})",
            generation,
            file_name,
            meta.len(),
            chunk_size
        );
        self.inner.callback.on_phase_change(Phase::CheckingAdmission);

        let submission = Submission {
            path: path.to_path_buf(),
            file_name,
            size: meta.len(),
            chunk_size,
        };
        self.run(generation, &cancel, &submission, &derived_name).await;

        Ok(self.final_job(generation).unwrap_or_else(|| {
            let mut job = template;
            job.fail(ABORT_MESSAGE);
            job
        }))
    }

    /// Abort the active job. Returns `false` when nothing was running.
    ///
    /// Stops the poller and any queue timers, asks the service to clean up
    /// if the job already has an id, and leaves the job in `error`.
    pub fn abort(&self) -> bool {
        let job_id = {
            let mut state = self.lock();
            let Some(job) = state.job.as_mut() else {
                return false;
            };
            if !job.phase.is_active() {
                return false;
            }
            job.fail(ABORT_MESSAGE);
            job.queue = None;
            let id = job.id.clone();
            state.cancel.cancel();
            id
        };

        info!("Job aborted by user");
        self.inner.callback.on_phase_change(Phase::Error);
        self.inner.callback.on_queue_update(None);
        if let Some(id) = job_id {
            retrieve::spawn_cleanup(Arc::clone(&self.inner.api), id);
        }
        true
    }

    /// Acknowledge a terminal job and return to `idle`. History is untouched.
    pub fn acknowledge(&self) -> Result<(), JobError> {
        {
            let mut state = self.lock();
            match &state.job {
                None => return Ok(()),
                Some(job) if !job.phase.is_terminal() => {
                    return Err(JobError::NotTerminal {
                        phase: job.phase.to_string(),
                    })
                }
                Some(_) => {}
            }
            state.cancel.cancel();
            let generation = state.generation;
            state.retired = state.job.take().map(|job| (generation, job));
            state.generation += 1;
        }
        debug!("Job acknowledged, controller idle");
        self.inner.callback.on_phase_change(Phase::Idle);
        self.inner.callback.on_queue_update(None);
        Ok(())
    }

    /// Manual download for the current job after its automatic one failed.
    pub async fn manual_download(&self) -> Result<PathBuf, JobError> {
        let entry = {
            let state = self.lock();
            state
                .job
                .as_ref()
                .filter(|j| j.phase == Phase::Finished)
                .and_then(|j| j.history_entry)
        };
        let entry = entry.ok_or_else(|| {
            JobError::Validation("No download is pending for the current job".into())
        })?;
        self.download_entry(entry).await
    }

    /// Manual download from the history affordance.
    ///
    /// Refused without a network call once the window has closed. If the
    /// service reports the artifact gone, the entry is removed and, when it
    /// belongs to the job still on screen, that job moves to `error`.
    pub async fn download_entry(&self, entry: EntryId) -> Result<PathBuf, JobError> {
        let history = &self.inner.history;
        let job_id = history.outstanding_job(entry)?;
        let file_name = history
            .get(entry)
            .map(|e| e.derived_name)
            .ok_or(JobError::UnknownEntry(entry.get()))?;

        info!("History {}: manual download of job {}", entry, job_id);
        let callback = Arc::clone(&self.inner.callback);
        let outcome = retrieve::retrieve(
            &self.inner.api,
            self.inner.sink.as_ref(),
            &job_id,
            &file_name,
            move |pct| callback.on_progress(Phase::Downloading, pct),
        )
        .await;

        match outcome {
            Retrieval::Saved { path, bytes } => {
                if !history.mark_retrieved(entry) {
                    debug!("History {}: window closed during the download", entry);
                }
                self.with_job_for_entry(entry, |job| {
                    job.warning = None;
                    job.manual_download = false;
                });
                self.inner.callback.on_saved(&file_name, bytes);
                Ok(path)
            }
            Retrieval::Expired => {
                history.remove(entry);
                let failed = self.with_job_for_entry(entry, |job| {
                    job.fail(EXPIRED_MESSAGE);
                    job.warning = None;
                    job.history_entry = None;
                });
                if failed {
                    self.inner.callback.on_phase_change(Phase::Error);
                }
                Err(JobError::ArtifactExpired)
            }
            Retrieval::Failed(reason) => Err(JobError::DownloadFailed(reason)),
        }
    }

    // ── Job run ──────────────────────────────────────────────────────────

    async fn run(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        submission: &Submission,
        derived_name: &str,
    ) {
        let inner = &self.inner;
        let size = submission.size;

        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = admission::check(inner.api.as_ref(), size) => result,
        };
        let mut decision = match first {
            Ok(d) => d,
            Err(e) => return self.fail(generation, format!("Could not reach the server: {e}")),
        };

        let job_id = loop {
            match admission::classify(&decision, size, inner.config.queue_ceiling) {
                Admission::Rejected(message) => return self.fail(generation, message),
                Admission::Granted => {}
                Admission::Wait => {
                    if !self.enter(generation, Phase::QueueWaiting) {
                        return;
                    }
                    let outcome = queue::wait_for_capacity(
                        inner.api.as_ref(),
                        size,
                        decision.clone(),
                        &inner.config,
                        cancel,
                        inner.callback.as_ref(),
                        |d, delay| self.set_queue(generation, Some(waiting_snapshot(d, delay))),
                    )
                    .await;
                    match outcome {
                        Ok(WaitOutcome::Admitted(_)) => {}
                        Ok(WaitOutcome::Rejected(message)) => {
                            return self.fail(generation, message)
                        }
                        Ok(WaitOutcome::Cancelled) => return,
                        Err(e) => {
                            return self
                                .fail(generation, format!("Could not reach the server: {e}"))
                        }
                    }
                }
            }

            if !self.enter(generation, Phase::Uploading) {
                return;
            }
            let this = self.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                o = upload::upload(inner.api.as_ref(), submission, move |pct| {
                    this.set_progress(generation, Phase::Uploading, pct)
                }) => o,
            };
            match outcome {
                UploadOutcome::Accepted(id) => break id,
                UploadOutcome::CapacityLost => {
                    info!("Job {}: capacity lost during upload, back to waiting", generation);
                    decision = AdmissionDecision::capacity_lost();
                }
                UploadOutcome::Failed(message) => return self.fail(generation, message),
            }
        };

        if self
            .update(generation, |job| job.assign_id(job_id.clone()))
            .is_none()
        {
            return;
        }

        let outcome = poll::poll_until_terminal(
            inner.api.as_ref(),
            &job_id,
            inner.config.poll_interval(),
            cancel,
            |report| self.apply_report(generation, report),
        )
        .await;
        match outcome {
            PollOutcome::Finished => {}
            PollOutcome::Failed(message) => return self.fail(generation, message),
            PollOutcome::Cancelled => return,
        }

        self.retrieve_artifact(generation, cancel, &job_id, derived_name)
            .await;
    }

    async fn retrieve_artifact(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        job_id: &str,
        derived_name: &str,
    ) {
        let inner = &self.inner;
        if !self.enter(generation, Phase::Downloading) {
            return;
        }

        let this = self.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = retrieve::retrieve(&inner.api, inner.sink.as_ref(), job_id, derived_name, move |pct| {
                this.set_progress(generation, Phase::Downloading, pct)
            }) => r,
        };

        match outcome {
            Retrieval::Saved { bytes, .. } => {
                // A file on disk always gets a ledger row, even if the run
                // was aborted while the save completed.
                let entry = inner.history.record(derived_name, None);
                if !self.is_current(generation) {
                    info!(
                        "Job {}: saved '{}' after the run was superseded",
                        generation, derived_name
                    );
                    return;
                }
                let applied = self.update(generation, |job| {
                    job.enter(Phase::Finished);
                    job.history_entry = Some(entry);
                });
                if applied.is_some() {
                    inner.callback.on_saved(derived_name, bytes);
                    inner.callback.on_phase_change(Phase::Finished);
                    info!("Job {}: finished, saved as '{}'", generation, derived_name);
                }
            }
            Retrieval::Expired => self.fail(generation, EXPIRED_MESSAGE.to_string()),
            Retrieval::Failed(reason) => {
                if !self.is_current(generation) {
                    return;
                }
                warn!(
                    "Job {}: automatic download failed ({}); manual download available for {}s",
                    generation,
                    reason,
                    inner.config.manual_download_window_secs
                );
                let entry = inner.history.record(derived_name, Some(job_id.to_string()));
                let warning = expiry_warning(inner.config.manual_download_window());
                let applied = self.update(generation, |job| {
                    job.enter(Phase::Finished);
                    job.history_entry = Some(entry);
                    job.warning = Some(warning.clone());
                    job.manual_download = true;
                });
                if applied.is_some() {
                    inner.callback.on_phase_change(Phase::Finished);
                    inner.callback.on_warning(&warning);
                }
            }
        }
    }

    /// Mirror one status report onto the job. `finished` and `error` are
    /// left to the caller, which owns those transitions.
    fn apply_report(&self, generation: u64, report: &StatusReport) {
        if let Some(phase) = report.phase.to_phase() {
            if !phase.is_terminal() {
                self.enter(generation, phase);
                if phase.is_measurable() {
                    self.set_progress(generation, phase, report.progress.min(100));
                }
            }
        }
        self.set_queue(generation, report.queue_snapshot());
    }

    // ── Guarded state access ─────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_idle(&self) -> Result<(), JobError> {
        match &self.lock().job {
            Some(job) => Err(JobError::Busy {
                phase: job.phase.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation && !state.cancel.is_cancelled()
    }

    /// Apply `f` to the job only if run `generation` still owns it.
    fn update<R>(&self, generation: u64, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.generation != generation || state.cancel.is_cancelled() {
            return None;
        }
        state.job.as_mut().map(f)
    }

    /// Enter `phase`. Returns `false` when the run has been superseded.
    fn enter(&self, generation: u64, phase: Phase) -> bool {
        let result = self.update(generation, |job| {
            let had_queue = job.queue.is_some();
            let changed = job.enter(phase);
            (changed, had_queue && job.queue.is_none())
        });
        match result {
            Some((changed, queue_cleared)) => {
                if changed {
                    debug!("Job {}: → {}", generation, phase);
                    self.inner.callback.on_phase_change(phase);
                }
                if queue_cleared {
                    self.inner.callback.on_queue_update(None);
                }
                true
            }
            None => false,
        }
    }

    fn fail(&self, generation: u64, message: String) {
        let applied = self.update(generation, |job| {
            job.fail(message.clone());
            job.queue = None;
        });
        if applied.is_some() {
            warn!("Job {} failed: {}", generation, message);
            self.inner.callback.on_phase_change(Phase::Error);
            self.inner.callback.on_queue_update(None);
        }
    }

    fn set_progress(&self, generation: u64, phase: Phase, percent: u8) {
        let applied = self.update(generation, |job| {
            if job.phase == phase && job.progress != percent {
                job.progress = percent;
                true
            } else {
                false
            }
        });
        if applied == Some(true) {
            self.inner.callback.on_progress(phase, percent);
        }
    }

    fn set_queue(&self, generation: u64, snapshot: Option<QueueSnapshot>) {
        let applied = self.update(generation, |job| {
            if job.queue != snapshot {
                job.queue = snapshot;
                true
            } else {
                false
            }
        });
        if applied == Some(true) {
            self.inner.callback.on_queue_update(snapshot);
        }
    }

    /// Apply `f` to the current job if it owns history `entry`.
    fn with_job_for_entry(&self, entry: EntryId, f: impl FnOnce(&mut Job)) -> bool {
        let mut state = self.lock();
        match state
            .job
            .as_mut()
            .filter(|job| job.history_entry == Some(entry))
        {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    fn final_job(&self, generation: u64) -> Option<Job> {
        let state = self.lock();
        let job = if state.generation == generation {
            state.job.clone()
        } else {
            state
                .retired
                .as_ref()
                .filter(|(g, _)| *g == generation)
                .map(|(_, job)| job.clone())
        };
        job.map(|j| self.with_affordance(j))
    }

    /// Refresh `manual_download` from the ledger, its single source of truth.
    fn with_affordance(&self, mut job: Job) -> Job {
        job.manual_download = job.phase == Phase::Finished
            && job
                .history_entry
                .is_some_and(|e| self.inner.history.is_outstanding(e));
        job
    }
}

/// Queue display while waiting for admission: we are behind everyone
/// already queued.
fn waiting_snapshot(decision: &AdmissionDecision, delay: Duration) -> QueueSnapshot {
    QueueSnapshot {
        position: decision.queue_count + 1,
        jobs_ahead: decision.queue_count,
        estimated_wait_secs: decision.retry_after_secs.unwrap_or(delay.as_secs()),
    }
}

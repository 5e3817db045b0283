//! Session-scoped history of finished jobs.
//!
//! The ledger is the only state that outlives a single job, and three code
//! paths write to it: auto-retrieval, manual retrieval, and the expiry timer.
//! Every mutation is a read-modify-write of the current list under one
//! mutex, so a manual download and an expiry racing for the same entry
//! resolve to exactly one winner: whichever clears the flag first; the other
//! sees it already cleared and does nothing.
//!
//! Only the most recently added entry may carry an outstanding download.
//! Adding an entry clears the flag, and cancels the timer, on all others.

use crate::error::JobError;
use crate::progress::ProgressCallback;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Session-unique identity of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A terminal record of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub derived_name: String,
    pub timestamp: DateTime<Utc>,
    /// The artifact was not retrieved yet and may still be fetched by hand.
    pub download_outstanding: bool,
    /// Present only while `download_outstanding` is true.
    pub job_id: Option<String>,
}

struct Slot {
    entry: HistoryEntry,
    expiry: Option<JoinHandle<()>>,
}

impl Slot {
    /// Drop the manual-download affordance and its timer.
    fn clear_outstanding(&mut self) -> bool {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
        let was = self.entry.download_outstanding;
        self.entry.download_outstanding = false;
        self.entry.job_id = None;
        was
    }
}

#[derive(Default)]
struct LedgerState {
    next_id: u64,
    slots: Vec<Slot>,
}

/// Shared handle to the session history. Cloning shares the same ledger.
#[derive(Clone)]
pub struct HistoryLedger {
    state: Arc<Mutex<LedgerState>>,
    window: Duration,
    callback: ProgressCallback,
}

impl fmt::Debug for HistoryLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryLedger")
            .field("entries", &self.entries())
            .field("window", &self.window)
            .finish()
    }
}

impl HistoryLedger {
    /// `window` is how long an outstanding download stays retrievable.
    pub fn new(window: Duration, callback: ProgressCallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            window,
            callback,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        let entries = self.entries();
        self.callback.on_history_update(&entries);
    }

    /// Append an entry. With `outstanding_job = Some(id)` the entry offers a
    /// manual download for [`Self::window`] and must be called from within a
    /// Tokio runtime so the expiry task can be spawned.
    pub fn record(&self, derived_name: impl Into<String>, outstanding_job: Option<String>) -> EntryId {
        let id = {
            let mut state = self.lock();
            for slot in state.slots.iter_mut() {
                if slot.clear_outstanding() {
                    debug!("History {}: superseded, download affordance dropped", slot.entry.id);
                }
            }

            state.next_id += 1;
            let id = EntryId(state.next_id);
            let outstanding = outstanding_job.is_some();
            let expiry = outstanding.then(|| {
                let ledger = self.clone();
                let window = self.window;
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    ledger.expire(id);
                })
            });
            state.slots.push(Slot {
                entry: HistoryEntry {
                    id,
                    derived_name: derived_name.into(),
                    timestamp: Utc::now(),
                    download_outstanding: outstanding,
                    job_id: outstanding_job,
                },
                expiry,
            });
            id
        };
        self.notify();
        id
    }

    /// Window elapsed: drop the affordance, keep the row. No-op when the
    /// download already succeeded.
    pub fn expire(&self, id: EntryId) -> bool {
        let expired = {
            let mut state = self.lock();
            match state.slots.iter_mut().find(|s| s.entry.id == id) {
                Some(slot) if slot.entry.download_outstanding => {
                    // The running task is this one; don't abort ourselves.
                    slot.expiry = None;
                    slot.entry.download_outstanding = false;
                    slot.entry.job_id = None;
                    true
                }
                _ => false,
            }
        };
        if expired {
            info!("History {}: manual download window expired", id);
            self.notify();
        }
        expired
    }

    /// A manual download succeeded: clear the flag and cancel the timer.
    /// Returns `false` if the expiry got there first.
    pub fn mark_retrieved(&self, id: EntryId) -> bool {
        let cleared = {
            let mut state = self.lock();
            state
                .slots
                .iter_mut()
                .find(|s| s.entry.id == id)
                .map(Slot::clear_outstanding)
                .unwrap_or(false)
        };
        if cleared {
            self.notify();
        }
        cleared
    }

    /// The artifact is confirmed gone server-side; forget the entry.
    pub fn remove(&self, id: EntryId) -> bool {
        let removed = {
            let mut state = self.lock();
            match state.slots.iter().position(|s| s.entry.id == id) {
                Some(pos) => {
                    let mut slot = state.slots.remove(pos);
                    slot.clear_outstanding();
                    true
                }
                None => false,
            }
        };
        if removed {
            self.notify();
        }
        removed
    }

    /// Job id to fetch for a manual download on `id`.
    pub fn outstanding_job(&self, id: EntryId) -> Result<String, JobError> {
        let state = self.lock();
        let slot = state
            .slots
            .iter()
            .find(|s| s.entry.id == id)
            .ok_or(JobError::UnknownEntry(id.get()))?;
        match (&slot.entry.job_id, slot.entry.download_outstanding) {
            (Some(job_id), true) => Ok(job_id.clone()),
            _ => Err(JobError::NoOutstandingDownload(id.get())),
        }
    }

    pub fn is_outstanding(&self, id: EntryId) -> bool {
        self.lock()
            .slots
            .iter()
            .any(|s| s.entry.id == id && s.entry.download_outstanding)
    }

    pub fn get(&self, id: EntryId) -> Option<HistoryEntry> {
        self.lock()
            .slots
            .iter()
            .find(|s| s.entry.id == id)
            .map(|s| s.entry.clone())
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().slots.iter().map(|s| s.entry.clone()).collect()
    }

    pub fn latest(&self) -> Option<HistoryEntry> {
        self.lock().slots.last().map(|s| s.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

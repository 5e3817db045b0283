//! Queue waiting: re-check admission on a two-tier schedule.
//!
//! The first denial waits `first_retry_delay`; every later denial in the
//! same episode waits `retry_delay`. There is no third tier.
//!
//! A countdown ticks once per `countdown_tick` for display. It never triggers
//! a re-check; only the delay elapsing does.

use super::admission::{self, Admission};
use crate::api::{AdmissionDecision, JobApi};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::progress::JobProgressCallback;
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Backoff bookkeeping for one waiting episode.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    first: Duration,
    subsequent: Duration,
}

impl RetryState {
    pub fn new(first: Duration, subsequent: Duration) -> Self {
        Self {
            attempt: 0,
            first,
            subsequent,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.first_retry_delay(), config.retry_delay())
    }

    /// Count a denial and return how long to wait before the next check.
    pub fn record_denial(&mut self) -> Duration {
        self.attempt += 1;
        self.delay()
    }

    /// Delay for the current attempt; zero before the first denial.
    pub fn delay(&self) -> Duration {
        match self.attempt {
            0 => Duration::ZERO,
            1 => self.first,
            _ => self.subsequent,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// How a waiting episode ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Admitted(AdmissionDecision),
    Rejected(String),
    Cancelled,
}

/// Wait until `denial` turns into admission, a definitive rejection, or
/// `cancel` fires.
///
/// `on_denial` sees every denial (the initial one included) with the delay
/// that will precede the next check, so the caller can show queue state.
/// A transport error on a re-check ends the episode with `Err`.
pub async fn wait_for_capacity(
    api: &dyn JobApi,
    file_size: u64,
    denial: AdmissionDecision,
    config: &ClientConfig,
    cancel: &CancellationToken,
    callback: &dyn JobProgressCallback,
    mut on_denial: impl FnMut(&AdmissionDecision, Duration),
) -> Result<WaitOutcome, ApiError> {
    let mut retry = RetryState::from_config(config);
    let mut decision = denial;

    loop {
        match admission::classify(&decision, file_size, config.queue_ceiling) {
            Admission::Granted => {
                debug!("Capacity found after {} denial(s)", retry.attempt());
                retry.reset();
                return Ok(WaitOutcome::Admitted(decision));
            }
            Admission::Rejected(message) => {
                info!("Giving up on queue: {}", message);
                return Ok(WaitOutcome::Rejected(message));
            }
            Admission::Wait => {}
        }

        let delay = retry.record_denial();
        info!(
            "No capacity ({} queued, {} active); re-checking in {}s (attempt {})",
            decision.queue_count,
            decision.active_jobs,
            delay.as_secs(),
            retry.attempt()
        );
        on_denial(&decision, delay);

        if !countdown(delay, retry.attempt(), config.countdown_tick(), cancel, callback).await {
            return Ok(WaitOutcome::Cancelled);
        }

        decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
            result = admission::check(api, file_size) => result?,
        };
    }
}

/// Sleep for `delay`, ticking the display countdown. Returns `false` when
/// cancelled before the delay elapsed.
async fn countdown(
    delay: Duration,
    attempt: u32,
    tick: Duration,
    cancel: &CancellationToken,
    callback: &dyn JobProgressCallback,
) -> bool {
    let deadline = Instant::now() + delay;
    let sleep = sleep_until(deadline);
    tokio::pin!(sleep);

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(ticker);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = &mut sleep => return true,
            Some(_) = ticks.next() => {
                callback.on_countdown(deadline.saturating_duration_since(Instant::now()), attempt);
            }
        }
    }
}

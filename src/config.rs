//! Configuration for talking to the remote job-queue service.
//!
//! Every timing constant the lifecycle depends on lives in [`ClientConfig`]
//! so tests can shrink them and operators can tune them without touching
//! the state machine. Built via [`ClientConfigBuilder`]; unset fields keep
//! the documented defaults.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the buffer reserved up front from a download's
/// `Content-Length`; larger artifacts grow the buffer as chunks arrive.
pub const MAX_DOWNLOAD_PREALLOC: usize = 64 * 1024 * 1024;

/// Client-side configuration for one session.
///
/// # Example
/// ```rust
/// use edgequake_pdfjob::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .base_url("http://localhost:8000")
///     .queue_ceiling(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_interval().as_millis(), 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the job-queue service, without trailing slash.
    /// Default: `http://localhost:8000`.
    pub base_url: String,

    /// Per-request timeout for JSON calls in seconds. Default: 30.
    ///
    /// Uploads and downloads are not bounded by this value; they can take as
    /// long as the file needs.
    pub request_timeout_secs: u64,

    /// Delay between status polls in milliseconds. Default: 1000.
    pub poll_interval_ms: u64,

    /// Wait after the first capacity denial in seconds. Default: 5.
    pub first_retry_delay_secs: u64,

    /// Wait after every subsequent capacity denial in seconds. Default: 15.
    pub retry_delay_secs: u64,

    /// Queue depth at which waiting is abandoned. Default: 10.
    pub queue_ceiling: u32,

    /// How long a failed auto-download stays retrievable by hand. Default: 60.
    pub manual_download_window_secs: u64,

    /// Countdown display tick in milliseconds. Default: 1000.
    pub countdown_tick_ms: u64,

    /// Directory the default sink saves artifacts into. Default: `.`.
    pub output_dir: PathBuf,

    /// Inserted before the extension of the original file name. Default: `_watermarked`.
    pub name_suffix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 30,
            poll_interval_ms: 1000,
            first_retry_delay_secs: 5,
            retry_delay_secs: 15,
            queue_ceiling: 10,
            manual_download_window_secs: 60,
            countdown_tick_ms: 1000,
            output_dir: PathBuf::from("."),
            name_suffix: "_watermarked".to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn first_retry_delay(&self) -> Duration {
        Duration::from_secs(self.first_retry_delay_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn manual_download_window(&self) -> Duration {
        Duration::from_secs(self.manual_download_window_secs)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn first_retry_delay_secs(mut self, secs: u64) -> Self {
        self.config.first_retry_delay_secs = secs;
        self
    }

    pub fn retry_delay_secs(mut self, secs: u64) -> Self {
        self.config.retry_delay_secs = secs;
        self
    }

    pub fn queue_ceiling(mut self, n: u32) -> Self {
        self.config.queue_ceiling = n;
        self
    }

    pub fn manual_download_window_secs(mut self, secs: u64) -> Self {
        self.config.manual_download_window_secs = secs;
        self
    }

    pub fn countdown_tick_ms(mut self, ms: u64) -> Self {
        self.config.countdown_tick_ms = ms;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.name_suffix = suffix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, JobError> {
        let c = &self.config;
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(JobError::Validation(format!(
                "Server URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.poll_interval_ms == 0 {
            return Err(JobError::Validation("Poll interval must be ≥ 1ms".into()));
        }
        if c.countdown_tick_ms == 0 {
            return Err(JobError::Validation("Countdown tick must be ≥ 1ms".into()));
        }
        if c.first_retry_delay_secs > c.retry_delay_secs {
            return Err(JobError::Validation(format!(
                "First retry delay ({}s) must not exceed the regular retry delay ({}s)",
                c.first_retry_delay_secs, c.retry_delay_secs
            )));
        }
        if c.queue_ceiling == 0 {
            return Err(JobError::Validation("Queue ceiling must be ≥ 1".into()));
        }
        if c.name_suffix.contains(['/', '\\']) {
            return Err(JobError::Validation(
                "Name suffix must not contain path separators".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let c = ClientConfig::default();
        assert_eq!(c.poll_interval(), Duration::from_secs(1));
        assert_eq!(c.queue_ceiling, 10);
        assert_eq!(c.manual_download_window(), Duration::from_secs(60));
        assert!(c.first_retry_delay() < c.retry_delay());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = ClientConfig::builder()
            .base_url("https://pdf.example.com/")
            .build()
            .unwrap();
        assert_eq!(c.base_url, "https://pdf.example.com");
    }

    #[test]
    fn rejects_non_http_url() {
        let err = ClientConfig::builder().base_url("ftp://x").build().unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn rejects_inverted_backoff_tiers() {
        let err = ClientConfig::builder()
            .first_retry_delay_secs(30)
            .retry_delay_secs(10)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }
}

//! HTTP implementation of [`JobApi`] on top of `reqwest`.
//!
//! ## Endpoints
//!
//! ```text
//! POST   /api/check-capacity   {"file_size": n}        → AdmissionDecision
//! POST   /api/upload           multipart file+chunk_size → {"job_id"} | 503
//! GET    /api/status/{id}                               → StatusReport
//! GET    /api/download/{id}                             → bytes | 410
//! DELETE /api/cleanup/{id}
//! ```
//!
//! JSON calls carry the configured request timeout. Uploads and downloads
//! do not: a large PDF on a slow link is not an error.

use super::{
    AdmissionDecision, DownloadOutcome, JobApi, StatusReport, Submission, SubmitOutcome,
    TransferProgress,
};
use crate::config::{ClientConfig, MAX_DOWNLOAD_PREALLOC};
use crate::error::ApiError;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Talks to the job-queue service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Accepted {
    #[serde(alias = "id")]
    job_id: String,
}

/// Error bodies come in a few shapes depending on which layer produced them.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    detail: Option<String>,
}

impl HttpJobApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("edgequake-pdfjob/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self::with_client(client, config))
    }

    /// Use a pre-built client (custom TLS roots, proxies, …).
    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            }
        } else {
            ApiError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        response: Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }
        response.json::<T>().await.map_err(|e| ApiError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Pull the server's message out of an error response, falling back to the
/// status line when the body is empty or not JSON.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    body.error
        .or(body.message)
        .or(body.detail)
        .filter(|m| !m.trim().is_empty())
        .or_else(|| {
            let t = text.trim();
            (!t.is_empty() && t.len() <= 200 && !t.starts_with('<')).then(|| t.to_string())
        })
        .unwrap_or_else(|| format!("HTTP {status}"))
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn check_admission(&self, file_size: u64) -> Result<AdmissionDecision, ApiError> {
        let url = self.url("/api/check-capacity");
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "file_size": file_size }))
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        let decision: AdmissionDecision = self.decode(&url, response).await?;
        debug!(
            "Admission for {} bytes: allowed={} queue_available={} queue_count={} active={}",
            file_size,
            decision.allowed,
            decision.queue_available,
            decision.queue_count,
            decision.active_jobs
        );
        Ok(decision)
    }

    async fn submit(
        &self,
        submission: &Submission,
        progress: TransferProgress,
    ) -> Result<SubmitOutcome, ApiError> {
        let url = self.url("/api/upload");
        let file = tokio::fs::File::open(&submission.path)
            .await
            .map_err(|source| ApiError::Source {
                path: submission.path.clone(),
                source,
            })?;

        let total = submission.size;
        let sent = Arc::new(AtomicU64::new(0));
        let body = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                let n = sent.fetch_add(bytes.len() as u64, Ordering::Relaxed) + bytes.len() as u64;
                progress(n, Some(total));
            }
            chunk
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(submission.file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| self.request_error(&url, e))?;
        let form = Form::new()
            .part("file", part)
            .text("chunk_size", submission.chunk_size.to_string());

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!("Upload of '{}' bounced: capacity lost", submission.file_name);
            return Ok(SubmitOutcome::CapacityLost);
        }
        if !status.is_success() {
            return Ok(SubmitOutcome::Rejected {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }
        let accepted: Accepted = response.json().await.map_err(|e| ApiError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(SubmitOutcome::Accepted {
            job_id: accepted.job_id,
        })
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport, ApiError> {
        let url = self.url(&format!("/api/status/{job_id}"));
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        self.decode(&url, response).await
    }

    async fn download(
        &self,
        job_id: &str,
        progress: TransferProgress,
    ) -> Result<DownloadOutcome, ApiError> {
        let url = self.url(&format!("/api/download/{job_id}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::GONE {
            return Ok(DownloadOutcome::Expired);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }

        let total = response.content_length();
        let reserve = total
            .map_or(0, |t| usize::try_from(t).unwrap_or(usize::MAX))
            .min(MAX_DOWNLOAD_PREALLOC);
        let mut buf = BytesMut::with_capacity(reserve);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.request_error(&url, e))?;
            buf.extend_from_slice(&chunk);
            progress(buf.len() as u64, total);
        }
        debug!("Downloaded {} bytes for job {}", buf.len(), job_id);
        Ok(DownloadOutcome::Artifact(buf.freeze()))
    }

    async fn cleanup(&self, job_id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/api/cleanup/{job_id}"));
        let response = self
            .client
            .delete(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }
        Ok(())
    }
}

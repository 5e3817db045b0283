//! HTTP contract tests for `HttpJobApi` against a local mock server.
//!
//! Run with:
//!   cargo test --test http_api

use edgequake_pdfjob::{
    ApiError, ChunkSize, ClientConfig, DownloadOutcome, HttpJobApi, JobApi, ServerPhase,
    Submission, SubmitOutcome, TransferProgress,
};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_test::assert_ok;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn api_for(server: &MockServer) -> HttpJobApi {
    let config = ClientConfig::builder()
        .base_url(server.base_url())
        .request_timeout_secs(5)
        .build()
        .unwrap();
    HttpJobApi::new(&config).unwrap()
}

/// Progress sink that keeps every `(done, total)` pair it sees.
fn recording_progress() -> (TransferProgress, Arc<Mutex<Vec<(u64, Option<u64>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let progress: TransferProgress = Arc::new(move |done, total| {
        sink.lock().unwrap().push((done, total));
    });
    (progress, seen)
}

fn submission(dir: &tempfile::TempDir, body: &[u8]) -> Submission {
    let path = dir.path().join("report.pdf");
    std::fs::write(&path, body).unwrap();
    Submission {
        path,
        file_name: "report.pdf".into(),
        size: body.len() as u64,
        chunk_size: ChunkSize::new(10).unwrap(),
    }
}

// ── Admission ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn check_admission_posts_size_and_parses_decision() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/check-capacity")
                .json_body(json!({ "file_size": 123_456 }));
            then.status(200).json_body(json!({
                "allowed": true,
                "max_file_size": 52_428_800,
                "queue_available": false,
                "message": "Queue is full",
                "retry_after": 90,
                "queue_count": 4,
                "active_jobs": 2
            }));
        })
        .await;

    let decision = assert_ok!(api_for(&server).check_admission(123_456).await);
    mock.assert_async().await;

    assert!(decision.allowed);
    assert!(!decision.queue_available);
    assert!(!decision.is_admitted());
    assert_eq!(decision.retry_after_secs, Some(90));
    assert_eq!(decision.queue_count, 4);
    assert_eq!(decision.active_jobs, 2);
}

#[tokio::test]
async fn admission_with_null_fields_still_decodes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/check-capacity");
            then.status(200).json_body(json!({
                "allowed": true,
                "queue_available": true,
                "message": null,
                "retry_after": null,
                "max_file_size": null,
                "queue_count": null,
                "active_jobs": null
            }));
        })
        .await;

    let decision = assert_ok!(api_for(&server).check_admission(1).await);
    assert!(decision.is_admitted());
    assert!(decision.message.is_empty());
    assert_eq!(decision.retry_after_secs, None);
    assert_eq!(decision.queue_count, 0);
    assert_eq!(decision.active_jobs, 0);
}

#[tokio::test]
async fn status_with_null_progress_decodes_as_zero() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/status/abc-123");
            then.status(200).json_body(json!({
                "status": "splitting",
                "progress": null,
                "queue_position": null,
                "error": null
            }));
        })
        .await;

    let report = assert_ok!(api_for(&server).status("abc-123").await);
    assert_eq!(report.phase, ServerPhase::Splitting);
    assert_eq!(report.progress, 0);
    assert!(report.queue_snapshot().is_none());
}

#[tokio::test]
async fn server_error_surfaces_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/check-capacity");
            then.status(500)
                .json_body(json!({ "error": "database unavailable" }));
        })
        .await;

    let err = api_for(&server).check_admission(1).await.unwrap_err();
    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("expected Status, got {other:?}"),
    }
}

// ── Upload ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_streams_file_and_returns_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let body = vec![b'%'; 64 * 1024];
    let sub = submission(&dir, &body);

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/upload")
                .body_contains("name=\"chunk_size\"")
                .body_contains("filename=\"report.pdf\"");
            then.status(200).json_body(json!({ "job_id": "abc-123" }));
        })
        .await;

    let (progress, seen) = recording_progress();
    let outcome = assert_ok!(api_for(&server).submit(&sub, progress).await);
    mock.assert_async().await;

    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            job_id: "abc-123".into()
        }
    );
    let seen = seen.lock().unwrap();
    assert_eq!(seen.last(), Some(&(body.len() as u64, Some(body.len() as u64))));
}

#[tokio::test]
async fn upload_503_means_capacity_lost() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(&dir, b"%PDF-1.7");

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/upload");
            then.status(503).json_body(json!({ "error": "Server at capacity" }));
        })
        .await;

    let (progress, _) = recording_progress();
    let outcome = assert_ok!(api_for(&server).submit(&sub, progress).await);
    assert_eq!(outcome, SubmitOutcome::CapacityLost);
}

#[tokio::test]
async fn upload_rejection_keeps_server_message_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(&dir, b"not a pdf");

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/upload");
            then.status(400)
                .json_body(json!({ "error": "Invalid file type: only PDF is accepted" }));
        })
        .await;

    let (progress, _) = recording_progress();
    let outcome = assert_ok!(api_for(&server).submit(&sub, progress).await);
    assert_eq!(
        outcome,
        SubmitOutcome::Rejected {
            status: 400,
            message: "Invalid file type: only PDF is accepted".into()
        }
    );
}

// ── Status ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_parses_phase_and_queue_payload() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/status/abc-123");
            then.status(200).json_body(json!({
                "status": "queued",
                "progress": 0,
                "queue_position": 3,
                "jobs_ahead": 2,
                "estimated_wait": 45
            }));
        })
        .await;

    let report = assert_ok!(api_for(&server).status("abc-123").await);
    assert_eq!(report.phase, ServerPhase::Queued);
    let queue = report.queue_snapshot().unwrap();
    assert_eq!(queue.position, 3);
    assert_eq!(queue.jobs_ahead, 2);
    assert_eq!(queue.estimated_wait_secs, 45);
}

#[tokio::test]
async fn status_with_unexpected_shape_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/status/abc-123");
            then.status(200).body("<html>proxy error</html>");
        })
        .await;

    let err = api_for(&server).status("abc-123").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }), "{err:?}");
}

// ── Download and cleanup ─────────────────────────────────────────────────────

#[tokio::test]
async fn download_reports_progress_against_content_length() {
    let payload = vec![7u8; 200 * 1024];
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/download/abc-123");
            then.status(200)
                .header("content-type", "application/pdf")
                .body(payload.clone());
        })
        .await;

    let (progress, seen) = recording_progress();
    let outcome = assert_ok!(api_for(&server).download("abc-123", progress).await);
    match outcome {
        DownloadOutcome::Artifact(bytes) => assert_eq!(bytes.len(), payload.len()),
        DownloadOutcome::Expired => panic!("expected an artifact"),
    }

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    let total = payload.len() as u64;
    assert!(seen.iter().all(|(_, t)| *t == Some(total)));
    assert_eq!(seen.last().map(|(done, _)| *done), Some(total));
}

#[tokio::test]
async fn download_410_means_expired() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/download/abc-123");
            then.status(410).json_body(json!({ "error": "File has expired" }));
        })
        .await;

    let (progress, seen) = recording_progress();
    let outcome = assert_ok!(api_for(&server).download("abc-123", progress).await);
    assert_eq!(outcome, DownloadOutcome::Expired);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cleanup_sends_delete() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/cleanup/abc-123");
            then.status(200).json_body(json!({ "ok": true }));
        })
        .await;

    assert_ok!(api_for(&server).cleanup("abc-123").await);
    mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let config = ClientConfig::builder()
        .base_url("http://127.0.0.1:9")
        .request_timeout_secs(2)
        .build()
        .unwrap();
    let api = HttpJobApi::new(&config).unwrap();

    let err = api.check_admission(1).await.unwrap_err();
    assert!(
        matches!(err, ApiError::Transport { .. } | ApiError::Timeout { .. }),
        "{err:?}"
    );
}

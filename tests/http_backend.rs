//! HTTP client tests against a mock conversion service.
//!
//! Uses wiremock to stand in for the upload / convert / cleanup / history
//! endpoints and the server-sent-events progress stream.

use bytes::Bytes;
use fily_convert::{
    ConversionBackend, ConversionType, ConvertOptions, ErrorKind, FileDescriptor, FilyError,
    HttpBackend, ItemStatus, Orchestrator, ProgressEvent, Quality, ServiceConfig, SourceRef,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config_for(server: &MockServer) -> ServiceConfig {
    ServiceConfig::builder()
        .base_url(server.uri())
        .request_timeout_secs(5)
        .connect_timeout_secs(2)
        .progress_stream(false)
        .build()
        .unwrap()
}

fn backend_for(server: &MockServer) -> HttpBackend {
    HttpBackend::new(&config_for(server)).unwrap()
}

fn payload() -> Bytes {
    Bytes::from_static(b"%PDF-1.4 fake")
}

// ── Upload ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_sends_multipart_file_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"file\""))
        .and(body_string_contains("filename=\"report.docx\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "file_id": "f-123",
            "filename": "report.docx"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = backend_for(&server)
        .upload("report.docx", None, payload())
        .await
        .unwrap();
    assert_eq!(id, "f-123");
}

#[tokio::test]
async fn test_upload_error_carries_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "File type not supported"})),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .upload("x.docx", Some("application/msword"), payload())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upload);
    assert_eq!(err.detail(), "File type not supported");
}

#[tokio::test]
async fn test_upload_without_body_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .upload("x.docx", None, payload())
        .await
        .unwrap_err();
    assert!(matches!(err, FilyError::Upload { .. }));
    assert!(err.detail().contains("500"), "got: {}", err.detail());
}

#[tokio::test]
async fn test_upload_to_unreachable_service_is_upload_error() {
    let config = ServiceConfig::builder()
        .base_url("http://127.0.0.1:1")
        .connect_timeout_secs(1)
        .build()
        .unwrap();
    let backend = HttpBackend::new(&config).unwrap();

    let err = backend.upload("x.docx", None, payload()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upload);
    assert!(err.detail().contains("conversion service"), "got: {}", err.detail());
}

// ── Convert ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_sends_options_and_resolves_relative_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(body_partial_json(json!({
            "file_id": "f-1",
            "original_filename": "contract.pdf",
            "conversion_type": "pdf-password",
            "quality": "low",
            "password": "s3cret",
            "output_name": "final_v2.pdf"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "download_url": "/download/f-1",
            "pdf_filename": "f-1.pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let options = ConvertOptions::new()
        .conversion_type(ConversionType::PdfPassword)
        .quality(Quality::Low)
        .password("s3cret")
        .output_name("final_v2");
    let url = backend_for(&server)
        .convert("f-1", "contract.pdf", &options)
        .await
        .unwrap();
    assert_eq!(url, format!("{}/download/f-1", server.uri()));
}

#[tokio::test]
async fn test_convert_falls_back_to_download_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"pdf_filename": "f-9.pdf"})),
        )
        .mount(&server)
        .await;

    let url = backend_for(&server)
        .convert("f-9", "a.txt", &ConvertOptions::default())
        .await
        .unwrap();
    assert_eq!(url, format!("{}/download/f-9", server.uri()));
}

#[tokio::test]
async fn test_convert_error_is_conversion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "Conversion failed"})),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .convert("f-1", "a.txt", &ConvertOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert_eq!(err.detail(), "Conversion failed");
}

// ── Cleanup, history, delete ─────────────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_success_and_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cleanup-files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cleanup-files"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    backend.cleanup().await.unwrap();
    let err = backend.cleanup().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cleanup);
}

#[tokio::test]
async fn test_recent_conversions_envelope_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/recent-conversions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "conversions": [
                {"file_id": "b", "original_filename": "b.png", "status": "completed",
                 "file_size": 2048, "created_at": "2024-05-02T09:30:00"},
                {"file_id": "a", "original_filename": "a.docx", "status": "failed",
                 "file_size": 10, "created_at": "2024-05-01T09:30:00"}
            ]
        })))
        .mount(&server)
        .await;

    let o = Orchestrator::new(config_for(&server)).unwrap();
    let recent = o.recent_conversions(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].file_id, "b");
    assert_eq!(recent[0].file_size, 2048);
    assert!(recent[0].created_at_utc().is_some());
}

#[tokio::test]
async fn test_recent_conversions_failure_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/recent-conversions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "Failed to load history"})),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server).recent_conversions().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("Failed to load history"));
}

#[tokio::test]
async fn test_delete_conversion_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/delete-conversion/ok-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/delete-conversion/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "File not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/delete-conversion/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "disk is full"})))
        .mount(&server)
        .await;

    let o = Orchestrator::new(config_for(&server)).unwrap();
    o.delete_conversion("ok-id").await.unwrap();

    let err = o.delete_conversion("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = o.delete_conversion("broken").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("disk is full"));
}

// ── Progress stream ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_progress_stream_decodes_sse_frames() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"file_id\": \"f-1\", \"progress\": 40, \"status\": \"converting\", \"message\": \"Converting...\"}\n\n",
        ": keep-alive\n\n",
        "data: {\"error\": \"Stream error\"}\n\n",
        "data: {\"file_id\": \"f-1\", \"progress\": 100, \"status\": \"completed\", \"message\": \"Done\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/stream-progress"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let channel = backend_for(&server).subscribe_progress().await.unwrap();
    let events: Vec<ProgressEvent> = channel.collect().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].percent(), 40);
    assert_eq!(events[0].status, "converting");
    assert_eq!(events[1].message, "Done");
}

#[tokio::test]
async fn test_progress_stream_unavailable_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream-progress"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = backend_for(&server).subscribe_progress().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

// ── Full batch over HTTP ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("filename=\"good.docx\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"file_id": "g"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("filename=\"bad.xlsx\""))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "File too large"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(body_partial_json(json!({"file_id": "g"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"download_url": "/download/g"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let o = Orchestrator::with_backend(config_for(&server), Arc::new(backend_for(&server)));
    let report = o.add_files(vec![
        (
            FileDescriptor::new("good.docx", 7),
            SourceRef::from(b"content".to_vec()),
        ),
        (
            FileDescriptor::new("bad.xlsx", 7),
            SourceRef::from(b"content".to_vec()),
        ),
    ]);

    let outcome = o.start_batch(ConvertOptions::default()).await;
    let summary = outcome.summary().unwrap();
    assert_eq!((summary.completed, summary.failed), (1, 1));

    let good = o.item(&report.accepted[0]).unwrap();
    assert_eq!(good.status, ItemStatus::Completed);
    assert_eq!(
        good.download_ref.as_deref(),
        Some(format!("{}/download/g", server.uri()).as_str())
    );

    let bad = o.item(&report.accepted[1]).unwrap();
    assert_eq!(bad.status, ItemStatus::Failed);
    assert_eq!(bad.error_detail.as_deref(), Some("File too large"));
}

//! Downloader behaviour against an in-process hub.

mod common;

use common::{payload, Plan, TestHub};
use modelfetch_core::cache::partial_path;
use modelfetch_core::hashing::compute_sha256;
use modelfetch_core::{
    DownloadOptions, DownloadProgress, Downloader, ErrorKind, FetchConfig, FetchError,
    ProgressSink, RetryPolicy,
};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

fn downloader() -> Downloader {
    Downloader::new(&FetchConfig::default()).unwrap()
}

#[tokio::test]
async fn test_fresh_download_reports_progress() {
    let hub = TestHub::start().await;
    let data = payload(300_000);
    hub.serve("model.gguf", data.clone());

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("nested/dir/model.gguf");

    let seen = Mutex::new(Vec::new());
    let on_progress = |p: &DownloadProgress| {
        seen.lock().unwrap().push((p.bytes_downloaded, p.total_bytes));
    };

    let result = downloader()
        .download(&hub.url("model.gguf"), &output, Some(&on_progress as &dyn ProgressSink))
        .await
        .unwrap();

    assert_eq!(result.path, output);
    assert_eq!(result.bytes_downloaded, 300_000);
    assert_eq!(result.total_size, 300_000);
    assert!(!result.was_resumed);
    assert!(!result.checksum_verified);
    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert!(!partial_path(&output).exists());

    let seen = seen.into_inner().unwrap();
    assert!(seen.len() >= 2, "expected throttled reports plus a final one");
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(*seen.last().unwrap(), (300_000, Some(300_000)));
}

#[tokio::test]
async fn test_resume_from_partial_is_byte_identical() {
    let hub = TestHub::start().await;
    let data = payload(200_000);
    hub.serve("model.gguf", data.clone());

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("model.gguf");
    std::fs::write(partial_path(&output), &data[..50_000]).unwrap();

    let result = downloader()
        .download(&hub.url("model.gguf"), &output, None)
        .await
        .unwrap();

    assert!(result.was_resumed);
    assert_eq!(result.bytes_downloaded, 150_000);
    assert_eq!(result.total_size, 200_000);
    assert_eq!(std::fs::read(&output).unwrap(), data);

    let requests = hub.requests_for("model.gguf");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].range.as_deref(), Some("bytes=50000-"));
}

#[tokio::test]
async fn test_resume_disabled_starts_over() {
    let hub = TestHub::start().await;
    let data = payload(10_000);
    hub.serve("model.gguf", data.clone());

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("model.gguf");
    std::fs::write(partial_path(&output), b"garbage").unwrap();

    let options = DownloadOptions::new().with_resume(false);
    let result = downloader()
        .download_with_options(&hub.url("model.gguf"), &output, &options, None)
        .await
        .unwrap();

    assert!(!result.was_resumed);
    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert_eq!(hub.requests_for("model.gguf")[0].range, None);
}

#[tokio::test]
async fn test_server_ignoring_range_restarts_from_zero() {
    let hub = TestHub::start().await;
    let data = payload(20_000);
    hub.set(
        "model.gguf",
        Plan::Serve {
            data: data.clone(),
            ranges: false,
        },
    );

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("model.gguf");
    std::fs::write(partial_path(&output), vec![0xAA; 5_000]).unwrap();

    let result = downloader()
        .download(&hub.url("model.gguf"), &output, None)
        .await
        .unwrap();

    assert!(!result.was_resumed);
    assert_eq!(result.bytes_downloaded, 20_000);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn test_unsatisfiable_range_discards_partial() {
    let hub = TestHub::start().await;
    let data = payload(4_000);
    hub.serve("model.gguf", data.clone());

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("model.gguf");
    std::fs::write(partial_path(&output), payload(9_000)).unwrap();

    let result = downloader()
        .download(&hub.url("model.gguf"), &output, None)
        .await
        .unwrap();

    assert!(!result.was_resumed);
    assert_eq!(std::fs::read(&output).unwrap(), data);

    let ranges: Vec<_> = hub
        .requests_for("model.gguf")
        .into_iter()
        .map(|s| s.range)
        .collect();
    assert_eq!(ranges, vec![Some("bytes=9000-".to_string()), None]);
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let hub = TestHub::start().await;
    hub.set(
        "busy.gguf",
        Plan::Status {
            code: 429,
            retry_after: Some(3),
        },
    );
    hub.set(
        "broken.gguf",
        Plan::Status {
            code: 500,
            retry_after: None,
        },
    );
    hub.set(
        "private.gguf",
        Plan::Status {
            code: 401,
            retry_after: None,
        },
    );

    let temp_dir = TempDir::new().unwrap();
    let dl = downloader();

    let err = dl
        .download(&hub.url("missing.gguf"), &temp_dir.path().join("m"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!err.is_retryable());
    assert!(!temp_dir.path().join("m").exists());

    let err = dl
        .download(&hub.url("busy.gguf"), &temp_dir.path().join("b"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(err.retry_after(), Some(3));

    let err = dl
        .download(&hub.url("broken.gguf"), &temp_dir.path().join("x"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ServerError { status: 500, .. }));

    let err = dl
        .download(&hub.url("private.gguf"), &temp_dir.path().join("p"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_truncated_stream_keeps_partial_for_resume() {
    let hub = TestHub::start().await;
    let data = payload(100_000);
    hub.set(
        "model.gguf",
        Plan::Truncate {
            data: data.clone(),
            cut_at: 30_000,
        },
    );

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("model.gguf");
    let dl = downloader();

    let err = dl
        .download(&hub.url("model.gguf"), &output, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_retryable());
    assert!(!output.exists());

    let partial = partial_path(&output);
    assert!(partial.exists());
    let kept = std::fs::metadata(&partial).unwrap().len() as usize;
    assert!(kept <= 30_000);
    assert_eq!(std::fs::read(&partial).unwrap(), data[..kept]);

    hub.serve("model.gguf", data.clone());
    let result = dl
        .download(&hub.url("model.gguf"), &output, None)
        .await
        .unwrap();
    assert_eq!(result.was_resumed, kept > 0);
    assert_eq!(result.bytes_downloaded as usize, 100_000 - kept);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn test_checksum_verification() {
    let hub = TestHub::start().await;
    let data = payload(8_192);
    hub.serve("model.gguf", data.clone());

    let temp_dir = TempDir::new().unwrap();
    let reference = temp_dir.path().join("reference.bin");
    std::fs::write(&reference, &data).unwrap();
    let expected = compute_sha256(&reference).unwrap();

    let dl = downloader();
    let good = temp_dir.path().join("good.gguf");
    let options = DownloadOptions::new().with_sha256(expected.to_uppercase());
    let result = dl
        .download_with_options(&hub.url("model.gguf"), &good, &options, None)
        .await
        .unwrap();
    assert!(result.checksum_verified);

    let bad = temp_dir.path().join("bad.gguf");
    let options = DownloadOptions::new().with_sha256("00".repeat(32));
    let err = dl
        .download_with_options(&hub.url("model.gguf"), &bad, &options, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
}

#[tokio::test]
async fn test_download_with_retry_recovers_from_server_errors() {
    let hub = TestHub::start().await;
    let data = payload(12_345);
    hub.set(
        "flaky.gguf",
        Plan::FailFirst {
            failures: 2,
            code: 503,
            data: data.clone(),
        },
    );

    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("flaky.gguf");
    let policy = RetryPolicy::new()
        .with_max_retries(3)
        .with_base_delay(Duration::from_millis(10))
        .with_jitter_fraction(0.0);

    let result = downloader()
        .download_with_retry(&hub.url("flaky.gguf"), &output, &policy, None)
        .await
        .unwrap();

    assert_eq!(result.total_size, 12_345);
    assert_eq!(std::fs::read(&output).unwrap(), data);
    assert_eq!(hub.requests_for("flaky.gguf").len(), 3);
}

#[tokio::test]
async fn test_download_with_retry_gives_up_on_terminal_errors() {
    let hub = TestHub::start().await;
    let temp_dir = TempDir::new().unwrap();
    let policy = RetryPolicy::new().with_base_delay(Duration::from_millis(1));

    let err = downloader()
        .download_with_retry(
            &hub.url("missing.gguf"),
            &temp_dir.path().join("missing.gguf"),
            &policy,
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(hub.requests_for("missing.gguf").len(), 1);
}

#[tokio::test]
async fn test_auth_token_is_sent() {
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;

    async fn guarded(headers: HeaderMap) -> Response {
        match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some("Bearer hf_secret") => (StatusCode::OK, "authorized").into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    let app = Router::new().route("/*path", get(guarded));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let temp_dir = TempDir::new().unwrap();
    let url = format!("http://{}/org/model/resolve/main/a.gguf", addr);

    let err = downloader()
        .download(&url, &temp_dir.path().join("anon"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let config = FetchConfig::default().with_auth_token("hf_secret");
    let result = Downloader::new(&config)
        .unwrap()
        .download(&url, &temp_dir.path().join("authed"), None)
        .await
        .unwrap();
    assert_eq!(std::fs::read(result.path).unwrap(), b"authorized");
}

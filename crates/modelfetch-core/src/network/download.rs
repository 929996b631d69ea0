//! Resumable single-file downloader.
//!
//! Provides:
//! - Resume from `<path>.part` via HTTP `Range`
//! - Throttled progress reports through a [`ProgressSink`]
//! - Atomic completion (partial file renamed onto the final path)
//! - Optional SHA-256 verification of the finished file
//! - Opt-in retries via [`RetryPolicy`]

use crate::cache::partial_path;
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::hashing::verify_sha256_async;
use crate::network::client::{classify_status, HttpClient};
use crate::network::progress::{DownloadProgress, ProgressSink};
use crate::network::retry::{retry_async, RetryPolicy};
use futures::StreamExt;
use reqwest::{header, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Per-call download knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Continue from an existing partial file.
    pub resume: bool,
    /// Expected SHA-256 of the finished file (hex).
    pub expected_sha256: Option<String>,
    /// Size to assume when the server does not report one.
    pub expected_size: Option<u64>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            resume: true,
            expected_sha256: None,
            expected_size: None,
        }
    }
}

impl DownloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into());
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Final path of the file.
    pub path: PathBuf,
    /// Bytes transferred by this call, excluding any resumed prefix.
    pub bytes_downloaded: u64,
    /// Size of the finished file.
    pub total_size: u64,
    pub was_resumed: bool,
    pub checksum_verified: bool,
}

/// Result of streaming one response into the partial file.
struct Transfer {
    session_bytes: u64,
    total_size: u64,
    resumed: bool,
}

/// Single-file downloader. Each instance owns its HTTP client.
#[derive(Debug, Clone)]
pub struct Downloader {
    http: HttpClient,
    read_timeout: Duration,
    progress_interval_bytes: u64,
    default_options: DownloadOptions,
}

impl Downloader {
    /// Create a downloader with its own HTTP client.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self::with_client(HttpClient::new(config)?, config))
    }

    /// Create a downloader around an existing HTTP client.
    pub fn with_client(http: HttpClient, config: &FetchConfig) -> Self {
        Self {
            http,
            read_timeout: config.read_timeout(),
            progress_interval_bytes: config.progress_interval_bytes.max(1),
            default_options: DownloadOptions::default().with_resume(config.resume),
        }
    }

    pub fn default_options(&self) -> &DownloadOptions {
        &self.default_options
    }

    /// Download `url` to `output_path` with the default options.
    pub async fn download(
        &self,
        url: &str,
        output_path: &Path,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<DownloadResult> {
        let options = self.default_options.clone();
        self.download_with_options(url, output_path, &options, sink)
            .await
    }

    /// Download with retries. Every retry resumes from the partial file the
    /// failed attempt left behind.
    pub async fn download_with_retry(
        &self,
        url: &str,
        output_path: &Path,
        policy: &RetryPolicy,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<DownloadResult> {
        let options = self.default_options.clone().with_resume(true);

        let (result, stats) = retry_async(policy, || {
            self.download_with_options(url, output_path, &options, sink)
        })
        .await;

        if stats.attempts > 1 {
            debug!(
                url,
                attempts = stats.attempts,
                total_delay_ms = stats.total_delay.as_millis() as u64,
                success = stats.success,
                "Download finished after retries"
            );
        }

        result
    }

    /// Download `url` to `output_path`.
    ///
    /// The body is written to `<output_path>.part`, which survives any failure
    /// for a later resume, and renamed onto `output_path` once complete.
    pub async fn download_with_options(
        &self,
        url: &str,
        output_path: &Path,
        options: &DownloadOptions,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<DownloadResult> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io_with_path(e, parent))?;
        }

        let part_path = partial_path(output_path);
        let start_byte = if options.resume {
            match tokio::fs::metadata(&part_path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(FetchError::io_with_path(e, &part_path)),
            }
        } else {
            0
        };

        let transfer = self
            .transfer(url, &part_path, start_byte, options, sink)
            .await?;

        finalize(&part_path, output_path).await?;

        let checksum_verified = match &options.expected_sha256 {
            Some(expected) => {
                verify_sha256_async(output_path.to_path_buf(), expected.clone())
                    .await
                    .inspect_err(|e| warn!(path = %output_path.display(), "{}", e))?;
                true
            }
            None => false,
        };

        info!(
            url,
            path = %output_path.display(),
            bytes = transfer.session_bytes,
            total = transfer.total_size,
            resumed = transfer.resumed,
            "Download complete"
        );

        Ok(DownloadResult {
            path: output_path.to_path_buf(),
            bytes_downloaded: transfer.session_bytes,
            total_size: transfer.total_size,
            was_resumed: transfer.resumed,
            checksum_verified,
        })
    }

    /// Issue the request, restarting from zero once if the server rejects the
    /// resume range, then stream the body into `part_path`.
    async fn transfer(
        &self,
        url: &str,
        part_path: &Path,
        start_byte: u64,
        options: &DownloadOptions,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<Transfer> {
        let mut start = start_byte;

        let response = loop {
            if start > 0 {
                info!(url, start, "Resuming download");
            }
            let response = self.http.get_from(url, start).await?;

            if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
                if start > 0 {
                    warn!(url, start, "Server rejected resume range, restarting from zero");
                    remove_if_exists(part_path).await?;
                    start = 0;
                    continue;
                }
                return Err(classify_status(response.status(), url, None));
            }
            break response;
        };

        let resumed = start > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        if start > 0 && !resumed {
            warn!(url, "Server does not support Range requests, restarting from zero");
        }
        let offset = if resumed { start } else { 0 };

        let total = if response.status() == StatusCode::PARTIAL_CONTENT {
            content_range_total(&response)
        } else {
            None
        }
        .or_else(|| response.content_length().map(|len| offset + len))
        .or(options.expected_size);

        let mut file = if resumed {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(part_path)
                .await
                .map_err(|e| FetchError::io_with_path(e, part_path))?
        } else {
            tokio::fs::File::create(part_path)
                .await
                .map_err(|e| FetchError::io_with_path(e, part_path))?
        };

        let started = Instant::now();
        let mut session_bytes: u64 = 0;
        let mut last_report: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout(self.read_timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| FetchError::Network {
                message: format!("Download stream error: {}", e),
                cause: std::error::Error::source(&e).map(|s| s.to_string()),
            })?;

            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io_with_path(e, part_path))?;
            session_bytes += chunk.len() as u64;

            if session_bytes - last_report >= self.progress_interval_bytes {
                last_report = session_bytes;
                if let Some(sink) = sink {
                    sink.on_progress(&DownloadProgress::new(offset + session_bytes, total, started));
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| FetchError::io_with_path(e, part_path))?;
        drop(file);

        let on_disk = offset + session_bytes;
        if let Some(sink) = sink {
            sink.on_progress(&DownloadProgress::new(on_disk, total.or(Some(on_disk)), started));
        }

        if let Some(total) = total {
            if on_disk < total {
                return Err(FetchError::Network {
                    message: format!("Incomplete download: got {} of {} bytes", on_disk, total),
                    cause: None,
                });
            }
            if on_disk > total {
                remove_if_exists(part_path).await?;
                return Err(FetchError::InvalidResponse {
                    message: format!("Server sent {} bytes, expected {}", on_disk, total),
                });
            }
        }

        Ok(Transfer {
            session_bytes,
            total_size: on_disk,
            resumed,
        })
    }
}

/// Move the partial file onto its final path, replacing a stale final once.
async fn finalize(part_path: &Path, output_path: &Path) -> Result<()> {
    match tokio::fs::rename(part_path, output_path).await {
        Ok(()) => Ok(()),
        Err(first) => {
            // Only a present partial and a present final make the final stale.
            if first.kind() == std::io::ErrorKind::NotFound
                || tokio::fs::metadata(part_path).await.is_err()
                || tokio::fs::metadata(output_path).await.is_err()
            {
                return Err(FetchError::io_with_path(first, output_path));
            }
            debug!(path = %output_path.display(), "Replacing stale file");
            remove_if_exists(output_path).await?;
            tokio::fs::rename(part_path, output_path)
                .await
                .map_err(|e| FetchError::io_with_path(e, output_path))
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FetchError::io_with_path(e, path)),
    }
}

/// Total length from `Content-Range: bytes <a>-<b>/<total>`.
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes")?
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 100-199/200"), Some(200));
        assert_eq!(parse_content_range_total("bytes 0-0/1"), Some(1));
        assert_eq!(parse_content_range_total("bytes 100-199/*"), None);
        assert_eq!(parse_content_range_total("items 1-2/3"), None);
    }

    #[test]
    fn test_options_builder() {
        let options = DownloadOptions::new()
            .with_resume(false)
            .with_sha256("abc")
            .with_expected_size(10);
        assert!(!options.resume);
        assert_eq!(options.expected_sha256.as_deref(), Some("abc"));
        assert_eq!(options.expected_size, Some(10));
        assert!(DownloadOptions::default().resume);
    }

    #[test]
    fn test_downloader_takes_resume_from_config() {
        let config = FetchConfig::default().with_resume(false);
        let downloader = Downloader::new(&config).unwrap();
        assert!(!downloader.default_options().resume);
    }

    #[tokio::test]
    async fn test_finalize_replaces_stale_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("model.gguf");
        let part = partial_path(&output);
        std::fs::write(&output, b"stale").unwrap();
        std::fs::write(&part, b"fresh").unwrap();

        finalize(&part, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"fresh");
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_finalize_missing_partial_is_io_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("model.gguf");
        let result = finalize(&partial_path(&output), &output).await;
        assert!(matches!(result, Err(FetchError::Io { .. })));
    }

    #[tokio::test]
    async fn test_finalize_missing_partial_keeps_final() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("model.gguf");
        std::fs::write(&output, b"finished by someone else").unwrap();

        let result = finalize(&partial_path(&output), &output).await;
        assert!(matches!(result, Err(FetchError::Io { .. })));
        assert_eq!(std::fs::read(&output).unwrap(), b"finished by someone else");
    }
}

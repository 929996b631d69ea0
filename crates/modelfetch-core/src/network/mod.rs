//! Network layer: HTTP client, downloads, rate limiting and retries.
//!
//! This module provides:
//! - HTTP client with status classification
//! - Resumable downloader with progress reporting
//! - Token bucket rate limiter shared by batch workers
//! - Retry policy with exponential backoff and jitter

mod client;
mod download;
mod progress;
mod rate_limiter;
mod retry;

pub use client::{classify_status, extract_domain, HttpClient};
pub use download::{DownloadOptions, DownloadResult, Downloader};
pub use progress::{DownloadProgress, ProgressSink};
pub use rate_limiter::RateLimiter;
pub use retry::{retry_async, RetryPolicy, RetryStats};

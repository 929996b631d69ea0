//! Error types for modelfetch.
//!
//! Every failure the cache, downloader and scheduler can produce maps onto one
//! [`FetchError`] variant. [`ErrorKind`] is the copyable classification used by
//! retry decisions and batch reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for modelfetch.
#[derive(Debug, Error)]
pub enum FetchError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Server timed out waiting for the request: {url}")]
    ServerTimeout { url: String },

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Server error {status} from {url}")]
    ServerError { url: String, status: u16 },

    // Client-side HTTP errors
    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Unauthorized: {url}")]
    Unauthorized { url: String },

    #[error("Forbidden: {url}")]
    Forbidden { url: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    // Local errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },
}

/// Result type alias for modelfetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Classification of a [`FetchError`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    InvalidResponse,
    InvalidRequest,
    ServerError,
    Cache,
    Download,
    Io,
    ChecksumMismatch,
    ResourceExhausted,
}

impl ErrorKind {
    /// Transient failures where replaying the request may succeed.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::ServerError | ErrorKind::Network
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Cache => "cache",
            ErrorKind::Download => "download",
            ErrorKind::Io => "io",
            ErrorKind::ChecksumMismatch => "checksum_mismatch",
            ErrorKind::ResourceExhausted => "resource_exhausted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        if is_storage_full(&err) {
            return FetchError::ResourceExhausted {
                message: err.to_string(),
            };
        }
        FetchError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(Duration::from_secs(0))
        } else {
            FetchError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl From<walkdir::Error> for FetchError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        match err.into_io_error() {
            Some(io) => match path {
                Some(path) => FetchError::io_with_path(io, path),
                None => FetchError::from(io),
            },
            None => FetchError::Cache {
                message: "filesystem loop detected while walking cache".to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl FetchError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if is_storage_full(&err) {
            return FetchError::ResourceExhausted {
                message: format!("{} ({})", err, path.display()),
            };
        }
        FetchError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network { .. } => ErrorKind::Network,
            FetchError::Timeout(_) | FetchError::ServerTimeout { .. } => ErrorKind::Timeout,
            FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::ServerError { .. } => ErrorKind::ServerError,
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::Unauthorized { .. } => ErrorKind::Unauthorized,
            FetchError::Forbidden { .. } => ErrorKind::Forbidden,
            FetchError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            FetchError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            FetchError::Cache { .. } => ErrorKind::Cache,
            FetchError::Download { .. } => ErrorKind::Download,
            FetchError::Io { .. } => ErrorKind::Io,
            FetchError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            FetchError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }

    /// Server-provided `Retry-After` hint, in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            FetchError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// ENOSPC on unix, ERROR_DISK_FULL on windows.
fn is_storage_full(err: &std::io::Error) -> bool {
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(28) => true,
        #[cfg(windows)]
        Some(112) => true,
        _ => false,
    }
}

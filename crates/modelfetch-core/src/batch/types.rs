//! Batch download value types.

use crate::config::NetworkConfig;
use crate::error::ErrorKind;
use crate::network::{DownloadProgress, DownloadResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub repo_id: String,
    pub filename: String,
    /// Directory to place the file in. `None` stores it in the cache.
    pub output_dir: Option<PathBuf>,
    pub revision: String,
}

impl DownloadItem {
    /// Item on the default revision, stored in the cache.
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            output_dir: None,
            revision: NetworkConfig::DEFAULT_REVISION.to_string(),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

/// Lifecycle of a batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl DownloadStatus {
    /// Whether the item has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Success
                | DownloadStatus::Failed
                | DownloadStatus::Skipped
                | DownloadStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Success => "success",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Skipped => "skipped",
            DownloadStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record for one batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncDownloadResult {
    pub item: DownloadItem,
    /// Position of the item in the submitted batch sequence.
    pub index: usize,
    pub status: DownloadStatus,
    pub result: Option<DownloadResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration: Duration,
}

impl AsyncDownloadResult {
    pub fn success(item: DownloadItem, index: usize, result: DownloadResult, duration: Duration) -> Self {
        Self {
            item,
            index,
            status: DownloadStatus::Success,
            result: Some(result),
            error: None,
            error_kind: None,
            duration,
        }
    }

    pub fn failed(
        item: DownloadItem,
        index: usize,
        error: String,
        error_kind: Option<ErrorKind>,
        duration: Duration,
    ) -> Self {
        Self {
            item,
            index,
            status: DownloadStatus::Failed,
            result: None,
            error: Some(error),
            error_kind,
            duration,
        }
    }

    /// Terminal record without a transfer.
    pub fn without_transfer(item: DownloadItem, index: usize, status: DownloadStatus) -> Self {
        Self {
            item,
            index,
            status,
            result: None,
            error: None,
            error_kind: None,
            duration: Duration::ZERO,
        }
    }
}

/// Aggregate view over batch results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Bytes transferred by successful items.
    pub total_bytes: u64,
    /// Sum of per-item durations.
    pub total_duration: Duration,
}

impl BatchSummary {
    pub fn from_results(results: &[AsyncDownloadResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };

        for r in results {
            match r.status {
                DownloadStatus::Success => {
                    summary.success += 1;
                    summary.total_bytes += r.result.as_ref().map_or(0, |d| d.bytes_downloaded);
                }
                DownloadStatus::Failed => summary.failed += 1,
                DownloadStatus::Skipped => summary.skipped += 1,
                DownloadStatus::Cancelled => summary.cancelled += 1,
                DownloadStatus::Pending | DownloadStatus::Downloading => {}
            }
            summary.total_duration += r.duration;
        }

        summary
    }

    /// Bytes per second across all successful transfers.
    pub fn average_throughput(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Batch progress, as a stream of events.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { index: usize },
    Progress { index: usize, progress: DownloadProgress },
    Finished { index: usize, status: DownloadStatus },
}

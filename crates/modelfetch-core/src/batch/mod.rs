//! Concurrent batch downloads.

mod queue;
mod scheduler;
mod types;

pub use scheduler::BatchScheduler;
pub use types::{AsyncDownloadResult, BatchEvent, BatchSummary, DownloadItem, DownloadStatus};

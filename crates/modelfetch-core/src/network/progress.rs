//! Download progress values and sinks.

use std::time::Instant;
use tokio::sync::mpsc;

/// Progress of one transfer at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Bytes on disk for this file, including any resumed prefix.
    pub bytes_downloaded: u64,
    /// Total size, if the server reported one.
    pub total_bytes: Option<u64>,
    pub start_time: Instant,
    pub current_time: Instant,
}

impl DownloadProgress {
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>, start_time: Instant) -> Self {
        Self {
            bytes_downloaded,
            total_bytes,
            start_time,
            current_time: Instant::now(),
        }
    }

    /// Percentage complete, `0..=100`.
    ///
    /// 100 when the total is zero or already reached; 0 when unknown.
    pub fn percent_complete(&self) -> u8 {
        match self.total_bytes {
            None => 0,
            Some(0) => 100,
            Some(total) if self.bytes_downloaded >= total => 100,
            Some(total) => {
                ((self.bytes_downloaded as u128 * 100) / total as u128).min(100) as u8
            }
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.current_time
            .saturating_duration_since(self.start_time)
            .as_secs_f64()
    }

    /// Average speed since the transfer started.
    pub fn speed_bytes_per_sec(&self) -> f64 {
        let elapsed = self.elapsed_secs();
        if elapsed > 0.0 {
            self.bytes_downloaded as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Estimated seconds remaining.
    pub fn eta_seconds(&self) -> Option<f64> {
        let total = self.total_bytes?;
        let speed = self.speed_bytes_per_sec();
        if speed > 0.0 {
            Some(total.saturating_sub(self.bytes_downloaded) as f64 / speed)
        } else {
            None
        }
    }
}

/// Receives progress reports for one transfer.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&DownloadProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &DownloadProgress) {
        self(progress)
    }
}

/// Drops reports when the channel is full; the next report supersedes them.
impl ProgressSink for mpsc::Sender<DownloadProgress> {
    fn on_progress(&self, progress: &DownloadProgress) {
        let _ = self.try_send(*progress);
    }
}

impl ProgressSink for mpsc::UnboundedSender<DownloadProgress> {
    fn on_progress(&self, progress: &DownloadProgress) {
        let _ = self.send(*progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn progress(downloaded: u64, total: Option<u64>, elapsed: Duration) -> DownloadProgress {
        let start = Instant::now();
        DownloadProgress {
            bytes_downloaded: downloaded,
            total_bytes: total,
            start_time: start,
            current_time: start + elapsed,
        }
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(progress(50, Some(100), Duration::ZERO).percent_complete(), 50);
        assert_eq!(progress(999, Some(1000), Duration::ZERO).percent_complete(), 99);
        assert_eq!(progress(0, Some(0), Duration::ZERO).percent_complete(), 100);
        assert_eq!(progress(150, Some(100), Duration::ZERO).percent_complete(), 100);
        assert_eq!(progress(150, None, Duration::ZERO).percent_complete(), 0);
    }

    #[test]
    fn test_speed_and_eta() {
        let p = progress(50, Some(100), Duration::from_secs(5));
        assert_eq!(p.speed_bytes_per_sec(), 10.0);
        assert_eq!(p.eta_seconds(), Some(5.0));

        let p = progress(50, None, Duration::from_secs(5));
        assert_eq!(p.eta_seconds(), None);
    }

    #[test]
    fn test_zero_elapsed_has_no_speed() {
        let p = progress(50, Some(100), Duration::ZERO);
        assert_eq!(p.speed_bytes_per_sec(), 0.0);
        assert_eq!(p.eta_seconds(), None);
    }

    #[test]
    fn test_closure_sink() {
        let seen = AtomicU64::new(0);
        let sink = |p: &DownloadProgress| seen.store(p.bytes_downloaded, Ordering::SeqCst);
        sink.on_progress(&progress(42, None, Duration::ZERO));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.on_progress(&progress(7, Some(10), Duration::ZERO));
        assert_eq!(rx.recv().await.unwrap().bytes_downloaded, 7);
    }
}

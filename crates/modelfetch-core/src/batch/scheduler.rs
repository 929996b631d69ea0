//! Worker pool that drains a shared download queue.
//!
//! Workers are tokio tasks, each owning a private [`Downloader`]. They share
//! the queue, one [`RateLimiter`] and the results list. A failure of any kind
//! inside an item, including a panic, becomes that item's terminal result and
//! never stops the worker.

use super::queue::WorkQueue;
use super::types::{AsyncDownloadResult, BatchEvent, BatchSummary, DownloadItem, DownloadStatus};
use crate::cache::{CacheKey, CacheStore};
use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use crate::network::{DownloadProgress, DownloadResult, Downloader, ProgressSink, RateLimiter};
use crate::resolver::{HubResolver, LocationResolver};
use crate::sync::resilient_lock;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type EventSender = mpsc::UnboundedSender<BatchEvent>;

/// State shared between the scheduler handle and its workers.
struct Shared {
    queue: WorkQueue<(usize, DownloadItem)>,
    limiter: RateLimiter,
    results: Mutex<Vec<AsyncDownloadResult>>,
    /// Items submitted but not yet recorded.
    pending: watch::Sender<usize>,
    next_index: AtomicUsize,
    events: Option<EventSender>,
    /// Destinations owned by running items. Two items never share a `.part`.
    claims: Mutex<HashSet<PathBuf>>,
    released: Notify,
}

impl Shared {
    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn record(&self, result: AsyncDownloadResult) {
        let (index, status) = (result.index, result.status);
        resilient_lock(&self.results).push(result);
        self.emit(BatchEvent::Finished { index, status });
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Take exclusive ownership of `path`, waiting while another item holds it.
    async fn claim(&self, path: &Path) -> DestinationClaim<'_> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if resilient_lock(&self.claims).insert(path.to_path_buf()) {
                return DestinationClaim {
                    shared: self,
                    path: path.to_path_buf(),
                };
            }
            debug!(path = %path.display(), "Destination busy, waiting");
            released.await;
        }
    }
}

/// Releases a claimed destination on drop, including during a panic unwind.
struct DestinationClaim<'a> {
    shared: &'a Shared,
    path: PathBuf,
}

impl Drop for DestinationClaim<'_> {
    fn drop(&mut self) {
        resilient_lock(&self.shared.claims).remove(&self.path);
        self.shared.released.notify_waiters();
    }
}

/// Everything a worker needs besides its downloader.
#[derive(Clone)]
struct WorkerContext {
    shared: Arc<Shared>,
    resolver: Arc<dyn LocationResolver>,
    cache: CacheStore,
}

/// Concurrent batch downloader.
pub struct BatchScheduler {
    config: FetchConfig,
    shared: Arc<Shared>,
    resolver: Arc<dyn LocationResolver>,
    cache: CacheStore,
    workers: Vec<JoinHandle<()>>,
}

impl BatchScheduler {
    pub fn new(config: &FetchConfig, resolver: Arc<dyn LocationResolver>, cache: CacheStore) -> Self {
        Self::build(config, resolver, cache, None)
    }

    /// Scheduler that also reports progress as [`BatchEvent`]s.
    pub fn with_events(
        config: &FetchConfig,
        resolver: Arc<dyn LocationResolver>,
        cache: CacheStore,
        events: EventSender,
    ) -> Self {
        Self::build(config, resolver, cache, Some(events))
    }

    /// Scheduler using the hub resolver and cache described by `config`.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            config,
            Arc::new(HubResolver::from_config(config)),
            CacheStore::from_config(config),
        )
    }

    fn build(
        config: &FetchConfig,
        resolver: Arc<dyn LocationResolver>,
        cache: CacheStore,
        events: Option<EventSender>,
    ) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            config: config.clone(),
            shared: Arc::new(Shared {
                queue: WorkQueue::new(),
                limiter: RateLimiter::new(config.requests_per_second),
                results: Mutex::new(Vec::new()),
                pending,
                next_index: AtomicUsize::new(0),
                events,
                claims: Mutex::new(HashSet::new()),
                released: Notify::new(),
            }),
            resolver,
            cache,
            workers: Vec::new(),
        }
    }

    /// Spawn `worker_count` workers. Must be called within a tokio runtime.
    pub fn start(&mut self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(FetchError::InvalidRequest {
                message: "worker count must be at least 1".to_string(),
            });
        }
        if !self.workers.is_empty() {
            return Err(FetchError::InvalidRequest {
                message: "scheduler already started".to_string(),
            });
        }
        if self.shared.queue.is_closed() {
            return Err(FetchError::InvalidRequest {
                message: "scheduler has been stopped".to_string(),
            });
        }

        let context = WorkerContext {
            shared: self.shared.clone(),
            resolver: self.resolver.clone(),
            cache: self.cache.clone(),
        };

        for id in 0..worker_count {
            let downloader = Downloader::new(&self.config)?;
            let context = context.clone();
            self.workers
                .push(tokio::spawn(run_worker(id, context, downloader)));
        }

        info!(
            workers = worker_count,
            requests_per_second = self.shared.limiter.capacity(),
            "Batch scheduler started"
        );
        Ok(())
    }

    /// Enqueue items. Returns the batch index assigned to each, in order.
    pub fn submit_batch(&self, items: Vec<DownloadItem>) -> Result<Vec<usize>> {
        if self.shared.queue.is_closed() {
            return Err(FetchError::InvalidRequest {
                message: "scheduler has been stopped".to_string(),
            });
        }

        let mut indices = Vec::with_capacity(items.len());
        for item in items {
            let index = self.shared.next_index.fetch_add(1, Ordering::SeqCst);
            self.shared.pending.send_modify(|n| *n += 1);
            if let Err((index, item)) = self.shared.queue.push((index, item)) {
                self.shared.record(AsyncDownloadResult::without_transfer(
                    item,
                    index,
                    DownloadStatus::Cancelled,
                ));
            }
            indices.push(index);
        }

        debug!(count = indices.len(), "Submitted batch");
        Ok(indices)
    }

    /// Items submitted but not yet finished.
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait until every submitted item has a terminal result.
    pub async fn wait_for_results(&self) -> Result<Vec<AsyncDownloadResult>> {
        if self.workers.is_empty() && self.pending() > 0 {
            return Err(FetchError::InvalidRequest {
                message: "scheduler has pending items but no workers; call start() first"
                    .to_string(),
            });
        }

        let mut rx = self.shared.pending.subscribe();
        rx.wait_for(|n| *n == 0)
            .await
            .map_err(|_| FetchError::InvalidRequest {
                message: "scheduler state dropped while waiting".to_string(),
            })?;

        Ok(self.get_results())
    }

    /// Snapshot of the results recorded so far, ordered by batch index.
    pub fn get_results(&self) -> Vec<AsyncDownloadResult> {
        let mut results = resilient_lock(&self.shared.results).clone();
        results.sort_by_key(|r| r.index);
        results
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_results(&resilient_lock(&self.shared.results))
    }

    /// Stop taking work. Queued items are recorded as cancelled; items
    /// already in flight finish normally.
    pub fn stop(&self) {
        let unstarted = self.shared.queue.close();
        if !unstarted.is_empty() {
            info!(cancelled = unstarted.len(), "Cancelling queued downloads");
        }
        for (index, item) in unstarted {
            self.shared.record(AsyncDownloadResult::without_transfer(
                item,
                index,
                DownloadStatus::Cancelled,
            ));
        }
    }

    /// Stop and wait for every worker to exit.
    pub async fn shutdown(&mut self) {
        self.stop();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Batch worker exited abnormally: {}", e);
            }
        }
        debug!("Batch scheduler shut down");
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        // Idle workers would otherwise wait on the queue forever.
        self.shared.queue.close();
    }
}

async fn run_worker(id: usize, context: WorkerContext, downloader: Downloader) {
    debug!(worker = id, "Worker started");

    while let Some((index, item)) = context.shared.queue.pop().await {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(context.process(&downloader, index, item.clone()))
            .catch_unwind()
            .await;

        let result = outcome.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(worker = id, index, "Download task panicked: {}", message);
            AsyncDownloadResult::failed(
                item,
                index,
                format!("panic: {}", message),
                None,
                started.elapsed(),
            )
        });

        context.shared.record(result);
    }

    debug!(worker = id, "Worker exiting");
}

impl WorkerContext {
    async fn process(
        &self,
        downloader: &Downloader,
        index: usize,
        item: DownloadItem,
    ) -> AsyncDownloadResult {
        let started = Instant::now();

        let destination = match self.destination(&item) {
            Ok(path) => path,
            Err(e) => return failed(item, index, e, started.elapsed()),
        };

        // A duplicate destination waits here, then finds the file and skips.
        let _claim = self.shared.claim(&destination).await;

        if tokio::fs::metadata(&destination)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            debug!(index, path = %destination.display(), "Already present, skipping");
            return AsyncDownloadResult::without_transfer(item, index, DownloadStatus::Skipped);
        }

        self.shared.emit(BatchEvent::Started { index });
        let waited = self.shared.limiter.acquire().await;
        if waited > Duration::ZERO {
            debug!(index, waited_ms = waited.as_millis() as u64, "Rate limited");
        }

        match self.fetch(downloader, index, &item, &destination).await {
            Ok(result) => {
                debug!(
                    index,
                    repo_id = %item.repo_id,
                    filename = %item.filename,
                    bytes = result.bytes_downloaded,
                    "Batch item complete"
                );
                AsyncDownloadResult::success(item, index, result, started.elapsed())
            }
            Err(e) => failed(item, index, e, started.elapsed()),
        }
    }

    async fn fetch(
        &self,
        downloader: &Downloader,
        index: usize,
        item: &DownloadItem,
        destination: &Path,
    ) -> Result<DownloadResult> {
        let location = self
            .resolver
            .resolve(&item.repo_id, &item.filename, &item.revision)
            .await?;

        let mut options = downloader.default_options().clone();
        if location.size.is_some() {
            options.expected_size = location.size;
        }

        let shared = &self.shared;
        let on_progress = move |progress: &DownloadProgress| {
            shared.emit(BatchEvent::Progress {
                index,
                progress: *progress,
            });
        };
        let sink: &dyn ProgressSink = &on_progress;

        downloader
            .download_with_options(&location.url, destination, &options, Some(sink))
            .await
    }

    /// `<output_dir>/<filename>` when an output directory is given, else the
    /// canonical cache path.
    fn destination(&self, item: &DownloadItem) -> Result<PathBuf> {
        let key = CacheKey::new(&item.repo_id, &item.filename, &item.revision);
        match &item.output_dir {
            Some(dir) => {
                key.validate()?;
                Ok(dir.join(&item.filename))
            }
            None => self.cache.prepare_cache_path(&key),
        }
    }
}

fn failed(item: DownloadItem, index: usize, error: FetchError, duration: Duration) -> AsyncDownloadResult {
    warn!(
        index,
        repo_id = %item.repo_id,
        filename = %item.filename,
        kind = %error.kind(),
        "Batch item failed: {}",
        error
    );
    let kind = error.kind();
    AsyncDownloadResult::failed(item, index, error.to_string(), Some(kind), duration)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

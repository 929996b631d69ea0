//! modelfetch core - model file cache and resumable downloader.
//!
//! This crate keeps a Hugging Face compatible snapshot cache on disk and
//! fills it with resumable, rate-limited, optionally concurrent downloads.
//! It has no presentation layer; see the `modelfetch` binary for a CLI.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelfetch_core::{CacheKey, CacheStore, Downloader, FetchConfig, HubResolver};
//!
//! #[tokio::main]
//! async fn main() -> modelfetch_core::Result<()> {
//!     let config = FetchConfig::from_env()?;
//!     let cache = CacheStore::from_config(&config);
//!     let key = CacheKey::main("TheBloke/Llama-2-7B-GGUF", "llama-2-7b.Q4_K_M.gguf");
//!
//!     let path = cache.prepare_cache_path(&key)?;
//!     let url = HubResolver::from_config(&config).file_url(&key.repo_id, &key.filename, &key.revision)?;
//!     let result = Downloader::new(&config)?.download(&url, &path, None).await?;
//!     println!("{} bytes at {}", result.total_size, result.path.display());
//!
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod hashing;
pub mod network;
pub mod resolver;

mod sync;

// Re-export commonly used types
pub use batch::{
    AsyncDownloadResult, BatchEvent, BatchScheduler, BatchSummary, DownloadItem, DownloadStatus,
};
pub use cache::{CacheKey, CacheStats, CacheStore, CachedRepo, ClearResult};
pub use config::{CacheConfig, FetchConfig, NetworkConfig};
pub use error::{ErrorKind, FetchError, Result};
pub use network::{
    DownloadOptions, DownloadProgress, DownloadResult, Downloader, ProgressSink, RateLimiter,
    RetryPolicy, RetryStats,
};
pub use resolver::{HubResolver, LocationResolver, ResolvedLocation};

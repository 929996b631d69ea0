//! Centralized configuration for modelfetch.
//!
//! Constant defaults live on the unit structs [`NetworkConfig`] and
//! [`CacheConfig`]. Runtime settings are carried by one explicit
//! [`FetchConfig`] value, built once at startup and handed by reference to
//! `CacheStore`, `Downloader` and `BatchScheduler`.

use crate::error::{FetchError, Result};
use crate::network::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Network-related defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "https://huggingface.co";
    pub const USER_AGENT: &'static str = concat!("modelfetch/", env!("CARGO_PKG_VERSION"));
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
    pub const REQUESTS_PER_SECOND: f64 = 10.0;
    pub const MAX_WORKERS: usize = 4;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
    pub const RETRY_MULTIPLIER: f64 = 2.0;
    pub const RETRY_JITTER_FRACTION: f64 = 0.25;
    pub const DOWNLOAD_PROGRESS_INTERVAL_BYTES: u64 = 64 * 1024;
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const DEFAULT_REVISION: &'static str = "main";
}

/// On-disk cache layout constants.
pub struct CacheConfig;

impl CacheConfig {
    pub const REPO_DIR_PREFIX: &'static str = "models--";
    pub const REPO_SEPARATOR: &'static str = "--";
    pub const SNAPSHOTS_DIR_NAME: &'static str = "snapshots";
    pub const GGUF_SUFFIXES: [&'static str; 2] = [".gguf", ".GGUF"];
    pub const HUB_SUBDIR: &'static str = "huggingface/hub";
}

/// Runtime configuration shared by the cache, downloader and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Root of the snapshot cache.
    pub cache_dir: PathBuf,
    /// Base URL of the model hub.
    pub endpoint: String,
    pub user_agent: String,
    /// Bearer token forwarded to the hub; never written back out.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Maximum silence between two body chunks.
    pub read_timeout_secs: u64,
    /// Token bucket capacity and refill rate shared by all workers.
    pub requests_per_second: f64,
    pub max_workers: usize,
    /// Resume from `.part` files left by earlier attempts.
    pub resume: bool,
    pub progress_interval_bytes: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_jitter_fraction: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(|key| std::env::var(key).ok()),
            endpoint: NetworkConfig::DEFAULT_ENDPOINT.to_string(),
            user_agent: NetworkConfig::USER_AGENT.to_string(),
            auth_token: None,
            connect_timeout_secs: NetworkConfig::CONNECT_TIMEOUT.as_secs(),
            request_timeout_secs: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            read_timeout_secs: NetworkConfig::READ_TIMEOUT.as_secs(),
            requests_per_second: NetworkConfig::REQUESTS_PER_SECOND,
            max_workers: NetworkConfig::MAX_WORKERS,
            resume: true,
            progress_interval_bytes: NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL_BYTES,
            max_retries: NetworkConfig::MAX_RETRIES,
            retry_base_delay_ms: NetworkConfig::RETRY_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: NetworkConfig::RETRY_MAX_DELAY.as_millis() as u64,
            retry_multiplier: NetworkConfig::RETRY_MULTIPLIER,
            retry_jitter_fraction: NetworkConfig::RETRY_JITTER_FRACTION,
        }
    }
}

impl FetchConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Recognised variables:
    /// - `MODELFETCH_CACHE_DIR`, `HF_HUB_CACHE`, `HF_HOME`, `XDG_CACHE_HOME`
    /// - `HF_ENDPOINT`, `HF_TOKEN`
    /// - `MODELFETCH_WORKERS`, `MODELFETCH_RPS`
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self {
            cache_dir: default_cache_dir(&lookup),
            ..Self::default()
        };

        if let Some(endpoint) = lookup("HF_ENDPOINT").filter(|v| !v.is_empty()) {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup("HF_TOKEN").filter(|v| !v.trim().is_empty()) {
            config.auth_token = Some(token.trim().to_string());
        }
        if let Some(workers) = lookup("MODELFETCH_WORKERS") {
            config.max_workers = workers.parse().map_err(|_| FetchError::InvalidRequest {
                message: format!("MODELFETCH_WORKERS is not a number: {}", workers),
            })?;
        }
        if let Some(rps) = lookup("MODELFETCH_RPS") {
            config.requests_per_second = rps.parse().map_err(|_| FetchError::InvalidRequest {
                message: format!("MODELFETCH_RPS is not a number: {}", rps),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| FetchError::io_with_path(e, path))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| FetchError::InvalidRequest {
            message: format!("Invalid config file {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(FetchError::InvalidRequest {
                message: message.to_string(),
            })
        };

        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1");
        }
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return invalid("requests_per_second must be a positive number");
        }
        if url::Url::parse(&self.endpoint).is_err() {
            return invalid("endpoint must be an absolute URL");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_fraction) {
            return invalid("retry_jitter_fraction must be within 0.0..=1.0");
        }
        if self.retry_multiplier < 1.0 {
            return invalid("retry_multiplier must be at least 1.0");
        }
        if self.progress_interval_bytes == 0 {
            return invalid("progress_interval_bytes must be positive");
        }
        Ok(())
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Retry policy described by this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_multiplier(self.retry_multiplier)
            .with_jitter_fraction(self.retry_jitter_fraction)
    }
}

/// Resolve the snapshot cache directory.
///
/// Checks in order:
/// 1. `$MODELFETCH_CACHE_DIR`
/// 2. `$HF_HUB_CACHE`
/// 3. `$HF_HOME/hub`
/// 4. `$XDG_CACHE_HOME/huggingface/hub`
/// 5. `~/.cache/huggingface/hub`
fn default_cache_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(dir) = non_empty("MODELFETCH_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = non_empty("HF_HUB_CACHE") {
        return PathBuf::from(dir);
    }
    if let Some(hf_home) = non_empty("HF_HOME") {
        return PathBuf::from(hf_home).join("hub");
    }
    if let Some(xdg_cache) = non_empty("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join(CacheConfig::HUB_SUBDIR);
    }

    dirs::home_dir()
        .map(|h| h.join(".cache").join(CacheConfig::HUB_SUBDIR))
        .unwrap_or_else(|| std::env::temp_dir().join(CacheConfig::HUB_SUBDIR))
}

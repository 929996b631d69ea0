//! Retry policy with exponential backoff and jitter.
//!
//! The policy only answers "should this attempt be retried and after how
//! long". Callers that want automatic replays drive an operation through
//! [`retry_async`]; nothing in the crate retries implicitly.

use crate::config::NetworkConfig;
use crate::error::{ErrorKind, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Backoff configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Uniform jitter as a fraction of the computed delay (0.0 disables it).
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: NetworkConfig::MAX_RETRIES,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            multiplier: NetworkConfig::RETRY_MULTIPLIER,
            jitter_fraction: NetworkConfig::RETRY_JITTER_FRACTION,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor. Values below 1.0 or non-finite fall back to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = sanitize_multiplier(multiplier);
        self
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `base * multiplier^attempt`, jittered by up to `±jitter_fraction`,
    /// clamped to `[1ms, max_delay]`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * sanitize_multiplier(self.multiplier).powi(exponent);

        let jittered = if self.jitter_fraction > 0.0 && raw.is_finite() {
            let spread = raw * self.jitter_fraction;
            let mut rng = rand::rng();
            raw + rng.random_range(-spread..=spread)
        } else {
            raw
        };

        // Overflowing exponentials land on the cap.
        let secs = if jittered.is_finite() {
            jittered.min(max_secs)
        } else {
            max_secs
        };

        Duration::from_secs_f64(secs.max(0.0)).max(MIN_DELAY).min(self.max_delay.max(MIN_DELAY))
    }

    /// Like [`calculate_delay`](Self::calculate_delay), but never shorter than
    /// a server-provided `Retry-After` hint.
    pub fn calculate_delay_with_retry_after(&self, attempt: u32, retry_after_secs: u64) -> Duration {
        self.calculate_delay(attempt)
            .max(Duration::from_secs(retry_after_secs))
    }

    /// Whether a failure of `kind` on attempt `attempt` (0-indexed) should be
    /// replayed.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        attempt < self.max_retries && kind.is_transient()
    }
}

/// Delays must never shrink between attempts.
fn sanitize_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay slept between attempts.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if an attempt failed.
    pub last_error: Option<String>,
}

/// Drive an async operation through a retry policy.
///
/// Transient failures are replayed up to `policy.max_retries` times.
/// `RateLimited` errors carrying a `Retry-After` hint wait at least that long.
///
/// # Returns
///
/// A tuple of (Result, RetryStats)
pub async fn retry_async<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> (Result<T, FetchError>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                if !policy.should_retry(e.kind(), attempt) {
                    if e.is_retryable() {
                        warn!(
                            "All {} retries exhausted. Last error: {}",
                            policy.max_retries, e
                        );
                    } else {
                        debug!("Error is not retryable: {}", e);
                    }
                    return (Err(e), stats);
                }

                let delay = match e.retry_after() {
                    Some(secs) => policy.calculate_delay_with_retry_after(attempt, secs),
                    None => policy.calculate_delay(attempt),
                };
                stats.total_delay += delay;

                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    policy.max_retries + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

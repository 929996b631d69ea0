//! Token bucket shared by all download workers.
//!
//! The bucket holds up to `capacity` tokens and refills at `capacity` tokens
//! per second. One token admits one request. Waiting callers sleep outside
//! the lock.

use crate::sync::resilient_lock;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_second` requests per second,
    /// with bursts of the same size. The bucket starts full.
    ///
    /// Non-positive or non-finite rates fall back to one request per second.
    pub fn new(requests_per_second: f64) -> Self {
        let capacity = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            requests_per_second
        } else {
            1.0
        };
        Self {
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens currently in the bucket, after refill.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = resilient_lock(&self.bucket);
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Wait for a token. Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let wait = {
            let mut bucket = resilient_lock(&self.bucket);
            self.refill(&mut bucket);
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return Duration::ZERO;
            }
            Duration::from_secs_f64((1.0 - bucket.tokens) / self.capacity)
        };

        debug!(wait_ms = wait.as_millis() as u64, "Rate limiter throttling request");
        tokio::time::sleep(wait).await;

        let mut bucket = resilient_lock(&self.bucket);
        self.refill(&mut bucket);
        // Concurrent waiters may drive the balance negative; later callers
        // then wait proportionally longer.
        bucket.tokens -= 1.0;
        wait
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = resilient_lock(&self.bucket);
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.capacity).min(self.capacity);
        bucket.last_refill = now;
    }
}

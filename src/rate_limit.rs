//! Fixed-window request throttling, composable in sequence.
//!
//! A bucket resets its counter entirely at each window boundary rather
//! than smoothly replenishing: bursts up to `capacity` are allowed at the
//! start of every window. Buckets are shared, process-wide state, one
//! instance per quota category; `wait()` is the only mutator.

use crate::error::TransportError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Mutable window state. Only [`RateLimitBucket::wait`] touches this.
#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

/// A fixed-window request throttle.
///
/// The window state lives behind a mutex held across the boundary sleep,
/// so concurrent callers serialize through `wait()` and the window
/// invariant holds without any locking at call sites.
#[derive(Debug)]
pub struct RateLimitBucket {
    capacity: u32,
    interval: Duration,
    window: Mutex<Window>,
}

impl RateLimitBucket {
    /// Creates a bucket allowing `capacity` requests per `interval`.
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            capacity,
            interval,
            window: Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Waits until a request slot is available in the current window.
    ///
    /// Returns immediately while the window has spare capacity; once
    /// full, sleeps until the window boundary and starts the next window
    /// with this request counted.
    pub async fn wait(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        if now.duration_since(window.start) >= self.interval {
            window.start = now;
            window.count = 1;
            return;
        }

        if window.count >= self.capacity {
            let boundary = window.start + self.interval;
            debug!(
                "rate limit window full ({}/{}), sleeping until boundary",
                window.count, self.capacity
            );
            tokio::time::sleep_until(boundary).await;
            window.start = Instant::now();
            window.count = 1;
            return;
        }

        window.count += 1;
    }
}

/// Executes operations behind a sequence of rate-limit buckets.
///
/// Buckets are waited on in the configured order (narrowest scope first,
/// global last, or however the caller composes them). A 429 from the
/// operation means the bucket configuration is already more generous than
/// the remote quota: the whole chain re-waits on every bucket and the
/// operation is retried, up to the configured ceiling.
#[derive(Debug)]
pub struct ChainedRequest {
    buckets: Vec<Arc<RateLimitBucket>>,
    quota_retry_limit: u32,
}

impl ChainedRequest {
    pub fn new(buckets: Vec<Arc<RateLimitBucket>>, quota_retry_limit: u32) -> Self {
        Self {
            buckets,
            quota_retry_limit,
        }
    }

    /// Waits on every bucket in the configured order.
    pub async fn wait_all(&self) {
        for bucket in &self.buckets {
            bucket.wait().await;
        }
    }

    /// Runs `op` once every bucket grants a slot, retrying rate-limited
    /// attempts through the whole chain again.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, TransportError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempts = 0u32;
        loop {
            self.wait_all().await;
            match op().await {
                Err(TransportError::RateLimited) => {
                    attempts += 1;
                    if attempts >= self.quota_retry_limit {
                        return Err(TransportError::QuotaExhausted { attempts });
                    }
                    warn!(
                        "remote quota exceeded (attempt {}/{}), re-waiting on all buckets",
                        attempts, self.quota_retry_limit
                    );
                }
                result => return result,
            }
        }
    }
}

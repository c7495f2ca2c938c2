//! Sliding-window request rate limiter
//!
//! The remote API enforces separate per-second ceilings for order
//! endpoints and for everything else. Each seller account gets its own
//! `RateLimiter` instance with one bucket per ceiling; limiter state is
//! never shared across accounts.

use std::collections::VecDeque;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Length of the sliding window
const WINDOW: Duration = Duration::from_secs(1);

/// Endpoint bucket a request is charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateBucket {
    /// Order endpoints (typically the higher ceiling)
    Orders,
    /// All other endpoints
    Other,
}

impl RateBucket {
    /// Bucket for a given endpoint path
    pub fn for_endpoint(endpoint: &str) -> Self {
        if endpoint.starts_with("order") {
            RateBucket::Orders
        } else {
            RateBucket::Other
        }
    }
}

impl std::fmt::Display for RateBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateBucket::Orders => write!(f, "orders"),
            RateBucket::Other => write!(f, "other"),
        }
    }
}

/// Timestamps of requests issued within the trailing window
#[derive(Debug, Default)]
struct BucketState {
    timestamps: VecDeque<Instant>,
}

/// Dual-bucket sliding-window rate limiter for one seller account
///
/// `acquire` blocks the calling task until a slot is free in the
/// requested bucket, then reserves it. The configured ceiling is never
/// exceeded and there is no burst allowance: the window is recomputed on
/// every call.
#[derive(Debug)]
pub struct RateLimiter {
    orders: Mutex<BucketState>,
    other: Mutex<BucketState>,
    orders_limit: u32,
    other_limit: u32,
}

impl RateLimiter {
    /// Create a new rate limiter from per-account ceilings
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            orders: Mutex::new(BucketState::default()),
            other: Mutex::new(BucketState::default()),
            orders_limit: config.orders_per_second.max(1),
            other_limit: config.other_per_second.max(1),
        }
    }

    /// Block until a request slot is available in the bucket, then take it
    ///
    /// Concurrent callers on the same bucket serialize on the bucket
    /// lock, which is held across the sleep so no two tasks can claim
    /// the same slot.
    pub async fn acquire(&self, bucket: RateBucket) {
        let (lock, limit) = match bucket {
            RateBucket::Orders => (&self.orders, self.orders_limit),
            RateBucket::Other => (&self.other, self.other_limit),
        };

        let mut state = lock.lock().await;

        loop {
            let now = Instant::now();

            // Drop timestamps that fell out of the trailing window
            while let Some(front) = state.timestamps.front() {
                if now.duration_since(*front) >= WINDOW {
                    state.timestamps.pop_front();
                } else {
                    break;
                }
            }

            if (state.timestamps.len() as u32) < limit {
                state.timestamps.push_back(now);
                return;
            }

            // Window is full; wait until the oldest entry expires
            if let Some(oldest) = state.timestamps.front().copied() {
                let wait = WINDOW - now.duration_since(oldest);
                debug!(
                    bucket = %bucket,
                    wait_ms = wait.as_millis() as u64,
                    "Rate ceiling reached, waiting"
                );
                sleep(wait).await;
            }
        }
    }

    /// Slots currently recorded in a bucket's window (for diagnostics)
    pub async fn in_flight(&self, bucket: RateBucket) -> usize {
        let lock = match bucket {
            RateBucket::Orders => &self.orders,
            RateBucket::Other => &self.other,
        };
        lock.lock().await.timestamps.len()
    }
}

//! Retry policy for handling transient failures with exponential backoff
//!
//! This module provides a retry mechanism with configurable backoff
//! strategy, jitter, and maximum retry limits for handling temporary
//! failures gracefully. The retry loop is an explicit bounded loop with
//! an attempt counter, never recursion.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::RetryableError;

/// Retry policy with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new RetryPolicy with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a RetryPolicy with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation will be retried up to `max_retries` times if it
    /// returns a retryable error. Each retry waits for an exponentially
    /// increasing backoff period with optional jitter.
    ///
    /// # Arguments
    ///
    /// * `operation` - A closure that returns a Future with Result<T, E>
    ///
    /// # Returns
    ///
    /// The result of the operation, or the last error if all retries are
    /// exhausted
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        if attempt >= self.config.max_retries {
                            warn!(
                                attempts = attempt + 1,
                                max_retries = self.config.max_retries,
                                "Max retries exhausted"
                            );
                        }
                        return Err(err);
                    }

                    let backoff = self.calculate_backoff(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate backoff duration for a given attempt number
    ///
    /// Exponential backoff: `initial_backoff * multiplier^attempt`,
    /// capped at `max_backoff_ms`, with an additive jitter of up to a
    /// quarter of the capped delay.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_backoff_ms as f64);

        let delay = if self.config.jitter && capped > 0.0 {
            capped + capped * rand::thread_rng().gen_range(0.0..0.25)
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }

    /// Maximum retry attempts after the initial one
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

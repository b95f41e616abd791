//! Retry policy for RPC calls
//!
//! Bounded retries with a linear backoff: the wait after the n-th failed try is
//! `base_delay * n`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::ScanSettings;

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of tries, the first one included. Treated as 1 when 0.
    pub attempts: u32,

    /// Base backoff, multiplied by the number of the failed try.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::config::DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(crate::config::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self::new(settings.retry_attempts, settings.retry_delay())
    }

    /// Backoff slept after the given failed try (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Executes an async operation with retry logic.
    ///
    /// Every failed try but the last logs a warning naming `name`. When all tries
    /// fail the last error is returned unchanged.
    ///
    /// ```rust,ignore
    /// let policy = RetryPolicy::new(3, Duration::from_secs(1));
    /// let head = policy.execute("eth_blockNumber", || client.block_number()).await?;
    /// ```
    pub async fn execute<F, Fut, T, E>(&self, name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            target: "feescan::etl::retry",
                            "{} succeeded after {} attempt(s)",
                            name,
                            attempt
                        );
                    }
                    return Ok(result);
                }
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        target: "feescan::etl::retry",
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        name,
                        attempt,
                        attempts,
                        err,
                        backoff
                    );

                    sleep(backoff).await;
                }
            }
        }
    }
}

//! Bounded retry with exponential backoff for network-class failures

use crate::{core::RetryConfig, Result};
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

/// Retries an operation while it fails with a retryable error.
///
/// Validation, account, execution and signing errors are returned on the first
/// occurrence. Retryable errors are attempted again at most
/// `RetryConfig::max_retries` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> usize {
        self.config.max_retries
    }

    /// Fresh backoff schedule; elapsed time is unbounded, the retry count is the limit
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_delay_ms))
            .with_max_interval(Duration::from_millis(self.config.max_delay_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        let mut retries = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("{} succeeded after {} retries", operation, retries);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && retries < self.config.max_retries => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_millis(self.config.max_delay_ms));
                    retries += 1;
                    warn!(
                        "Retrying {} after {:?} (attempt {}/{}): {}",
                        operation, delay, retries, self.config.max_retries, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

//! Retry policy for gateway calls.

use std::future::Future;
use std::time::Duration;
use vip_core::config::{BackoffStrategy, MonitorConfig, TransferConfig};
use vip_core::error::Result;

/// Controls how many times a failed call is retried and how long to wait
/// between attempts. Only transient errors are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, strategy: BackoffStrategy, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            strategy,
            base_delay_ms,
        }
    }

    pub fn for_transfers(config: &TransferConfig) -> Self {
        Self::new(config.max_retries, config.backoff, config.retry_delay_ms)
    }

    pub fn for_status(config: &MonitorConfig) -> Self {
        Self::new(
            config.status_retries,
            BackoffStrategy::Fixed,
            config.status_retry_delay_ms,
        )
    }

    /// Whether the given retry number (0-indexed) is within the budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay in milliseconds before the given retry (0 is the first retry).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(attempt as u64 + 1),
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        }
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.should_retry(attempt) => {
                    let delay = self.delay_ms(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}ms",
                        label,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_transfers(&TransferConfig::default())
    }
}

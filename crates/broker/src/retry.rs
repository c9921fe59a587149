//! Bounded exponential-backoff retry for vendor operations.

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::errors::{BrokerError, RetryClass};

/// Retry policy applied around one per-symbol vendor operation.
///
/// Attempts run `0..=max_retries`. After failed attempt `n` the policy sleeps
/// `min(max_delay, base_delay * 2^n)` before trying again. Every failure is
/// retried except [`RetryClass::AbortBatch`], which is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Same delays, different retry budget.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Delay to wait after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` on the current thread, sleeping the thread between attempts.
    ///
    /// Meant for code already running on a vendor worker thread.
    pub fn retry_blocking<T, F>(&self, label: &str, mut op: F) -> Result<T, BrokerError>
    where
        F: FnMut(u32) -> Result<T, BrokerError>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(delay) = self.next_delay(label, attempt, &err) else {
                        return Err(err);
                    };
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Async form of [`retry_blocking`](Self::retry_blocking), sleeping on the tokio timer.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, BrokerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(delay) = self.next_delay(label, attempt, &err) else {
                        return Err(err);
                    };
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Decides whether to try again after `err`, logging the decision.
    fn next_delay(&self, label: &str, attempt: u32, err: &BrokerError) -> Option<Duration> {
        let class = err.retry_class();
        if class == RetryClass::AbortBatch {
            return None;
        }
        if attempt >= self.max_retries {
            warn!(
                "{}: giving up after {} attempts: {}",
                label,
                attempt + 1,
                err
            );
            return None;
        }
        let delay = self.delay_for(attempt);
        warn!(
            "{}: attempt {}/{} failed ({:?}), retrying in {:?}: {}",
            label,
            attempt + 1,
            self.max_retries + 1,
            class,
            delay,
            err
        );
        Some(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1), Duration::from_secs(30))
    }
}

//! Bounded exponential backoff for retryable failures.
use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Settings controlling [`with_retry`].
///
/// A request refused by the client's [`RateLimiter`](crate::RateLimiter) is
/// retried like any other transient failure. The defaults back off for about
/// 0.8s in total, less than the default limiter's one second refill, so a
/// caller that drains the bucket can exhaust its retries before a token comes
/// back. Raise `initial_interval` to at least the limiter's `refill_period`
/// when sustained bursts are expected.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// How many times a failed operation is retried after the first attempt.
    pub max_retries: u32,
    /// The delay after the first failure.
    pub initial_interval: Duration,
    /// The upper bound on the delay before jitter is added.
    pub max_interval: Duration,
    /// The factor the delay grows by after each failure.
    pub multiplier: f64,
    /// The maximum extra delay, as a fraction of the computed delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The delay before retry number `retry` (zero-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.initial_interval.as_secs_f64() * factor;
        let max = self.max_interval.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(1.0 + extra)
    }
}

/// Run `operation`, retrying retryable failures with exponential backoff.
///
/// The operation runs at most `max_retries + 1` times. Non-retryable errors are
/// returned immediately. Cancellation is checked before every attempt and
/// interrupts any backoff sleep.
pub async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(cancel, config, Error::is_retryable, operation).await
}

/// Like [`with_retry`], retrying only errors accepted by `should_retry`.
pub async fn with_retry_if<T, F, Fut, P>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut retry = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !should_retry(&err) {
            return Err(err);
        }
        if retry >= config.max_retries {
            return Err(Error::RetryExhausted {
                attempts: retry + 1,
                source: Box::new(err),
            });
        }
        let delay = config.delay(retry);
        warn!(
            attempt = retry + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying Autotask request"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Retry cancelled during backoff");
                return Err(Error::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        retry += 1;
    }
}

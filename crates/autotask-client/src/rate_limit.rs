//! A non-blocking token bucket bounding the outbound request rate.
use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

/// Settings for a [`RateLimiter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// The bucket capacity, which is also the number of tokens it starts with.
    pub max_tokens: u32,
    /// The number of tokens added every `refill_period`.
    pub refill_rate: u32,
    /// How often tokens are added.
    pub refill_period: Duration,
}

impl Default for RateLimitConfig {
    /// 60 requests per minute with a burst of 60.
    fn default() -> Self {
        Self {
            max_tokens: 60,
            refill_rate: 1,
            refill_period: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// A token bucket rate limiter.
///
/// [`RateLimiter::acquire`] never waits; callers are expected to back off
/// when it refuses a token.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = Bucket {
            tokens: config.max_tokens,
            last_refill: Instant::now(),
        };
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    /// Take a token if one is available.
    pub fn acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// The number of tokens currently available.
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let max = self.config.max_tokens;
        let period = self.config.refill_period;
        if period.is_zero() {
            bucket.tokens = max;
            bucket.last_refill = now;
            return;
        }
        if self.config.refill_rate == 0 {
            bucket.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let periods = elapsed.as_nanos() / period.as_nanos();
        if periods == 0 {
            return;
        }
        let added = periods.saturating_mul(u128::from(self.config.refill_rate));
        let tokens = u128::from(bucket.tokens).saturating_add(added);
        if tokens >= u128::from(max) {
            bucket.tokens = max;
            bucket.last_refill = now;
        } else {
            // Below capacity with a non-zero rate, so `periods` is below `max`.
            bucket.tokens = tokens as u32;
            bucket.last_refill += period * periods as u32;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_tokens: u32, refill_rate: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_tokens,
            refill_rate,
            refill_period: Duration::from_secs(1),
        })
    }

    fn drain(limiter: &RateLimiter) -> u32 {
        let mut granted = 0;
        while limiter.acquire() {
            granted += 1;
        }
        granted
    }

    #[tokio::test(start_paused = true)]
    async fn starts_full_and_refuses_when_empty() {
        let limiter = limiter(5, 1);
        assert_eq!(drain(&limiter), 5);
        assert!(!limiter.acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_whole_periods_only() {
        let limiter = limiter(10, 2);
        assert_eq!(drain(&limiter), 10);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!limiter.acquire());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(drain(&limiter), 2);

        // A partial period carries over to the next refill.
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(drain(&limiter), 2);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(drain(&limiter), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn grants_min_of_capacity_and_refill() {
        for k in 0..8u32 {
            let limiter = limiter(5, 2);
            assert_eq!(drain(&limiter), 5);
            tokio::time::advance(Duration::from_secs(u64::from(k))).await;
            assert_eq!(drain(&limiter), (k * 2).min(5), "after {k} periods");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_never_refills() {
        let limiter = limiter(2, 0);
        assert_eq!(drain(&limiter), 2);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!limiter.acquire());
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_never_limits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_tokens: 1,
            refill_rate: 1,
            refill_period: Duration::ZERO,
        });
        for _ in 0..10 {
            assert!(limiter.acquire());
        }
    }
}

//! Token-bucket admission control.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::errors::ConfigError;

/// Rate limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub tokens_per_second: f64,
    /// Bucket capacity; also the initial token count.
    pub bucket_size: u32,
}

impl RateLimitConfig {
    /// Checks that the bucket can ever admit a call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tokens_per_second.is_finite() || self.tokens_per_second < 0.0 {
            return Err(ConfigError::invalid(
                "rate_limit.tokens_per_second",
                "must be a non-negative number",
            ));
        }
        if self.bucket_size == 0 {
            return Err(ConfigError::invalid("rate_limit.bucket_size", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket. [`allow`](Self::allow) never blocks.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(tokens_per_second: f64, bucket_size: u32) -> Self {
        let capacity = f64::from(bucket_size);
        Self {
            capacity,
            rate: tokens_per_second,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a bucket from validated settings.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.tokens_per_second, config.bucket_size))
    }

    /// Refills, then takes one token if available.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns the tokens currently available, after refilling.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Returns the refill rate in tokens per second.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = elapsed.mul_add(self.rate, state.tokens).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_drains_and_refills() {
        let bucket = TokenBucket::new(2.0, 2);
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let bucket = TokenBucket::new(100.0, 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!((bucket.available() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_denied_call_consumes_nothing() {
        let bucket = TokenBucket::new(0.0, 1);
        assert!(bucket.allow());
        assert!(!bucket.allow());
        assert!(!bucket.allow());
        assert!(bucket.available() < 1.0);
    }

    #[test]
    fn test_config_validation() {
        let bad = RateLimitConfig {
            tokens_per_second: 5.0,
            bucket_size: 0,
        };
        assert!(TokenBucket::from_config(&bad).is_err());

        let good = RateLimitConfig {
            tokens_per_second: 5.0,
            bucket_size: 10,
        };
        let bucket = TokenBucket::from_config(&good).unwrap();
        assert!((bucket.capacity() - 10.0).abs() < f64::EPSILON);
        assert!((bucket.rate() - 5.0).abs() < f64::EPSILON);
    }
}

//! Admission control, fault isolation and bounded retry.
//!
//! [`ResilienceMiddleware`] composes the three pieces in this order:
//! a [`TokenBucket`] admission check, then a retry loop whose attempts go
//! through a [`CircuitBreaker`].

mod circuit_breaker;
mod rate_limiter;
mod retry;
mod stage;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitCounts, CircuitState, ThresholdCircuitBreaker,
};
pub use rate_limiter::{RateLimitConfig, TokenBucket};
pub use retry::{RetryConfig, DEFAULT_RETRYABLE_ERRORS};
pub use stage::{ResilienceConfig, ResilienceMiddleware, ResilienceStats};

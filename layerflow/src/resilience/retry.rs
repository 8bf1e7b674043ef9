//! Retry policy with exponential backoff and optional jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration::serde_millis;
use crate::errors::{ConfigError, LayerflowError};

/// Error identities retried when no explicit list is configured.
pub const DEFAULT_RETRYABLE_ERRORS: [&str; 3] = ["timeout", "connection refused", "temporary failure"];

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "serde_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "serde_millis")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Random spread added to each delay, as a fraction of it (0 disables).
    pub jitter_factor: f64,
    /// Error identities that may be retried.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter_factor: 0.0,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Replaces the retryable identities.
    #[must_use]
    pub fn with_retryable_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = errors.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the policy is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid("retry.backoff_factor", "must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid("retry.jitter_factor", "must be between 0 and 1"));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::invalid("retry.initial_delay", "must not exceed max_delay"));
        }
        Ok(())
    }

    /// Returns whether an error may be retried.
    ///
    /// Matches either the error's identity or its display form exactly.
    #[must_use]
    pub fn is_retryable(&self, error: &LayerflowError) -> bool {
        let identity = error.identity();
        let display = error.to_string();
        self.retryable_errors
            .iter()
            .any(|candidate| *candidate == identity || *candidate == display)
    }

    /// Returns the delay after failed attempt `attempt` (1-based), without jitter.
    ///
    /// `initial_delay × backoff_factor^(attempt-1)`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Returns the delay after failed attempt `attempt`, with jitter applied.
    ///
    /// Jitter adds up to `jitter_factor` of the base delay; the result is
    /// still capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter_factor;
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        (base + Duration::from_secs_f64(extra)).min(self.max_delay)
    }
}

//! Circuit breaker contract and a consecutive-failure implementation.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::duration::serde_millis;
use crate::core::Response;
use crate::errors::{ConfigError, LayerflowError};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without reaching the downstream.
    Open,
    /// A limited number of probe calls are let through.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call counters kept by a breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitCounts {
    /// Calls admitted to the downstream.
    pub requests: u64,
    /// Successful calls.
    pub total_successes: u64,
    /// Failed calls.
    pub total_failures: u64,
    /// Successes since the last failure or state change.
    pub consecutive_successes: u64,
    /// Failures since the last success or state change.
    pub consecutive_failures: u64,
}

/// A fault-isolation wrapper around downstream calls.
///
/// Implementations own their synchronization and must be safe to share.
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    /// Runs `op` unless the breaker rejects it with [`LayerflowError::CircuitOpen`].
    async fn call<'a>(
        &self,
        op: BoxFuture<'a, Result<Response, LayerflowError>>,
    ) -> Result<Response, LayerflowError>;

    /// Returns the current state.
    fn state(&self) -> CircuitState;

    /// Returns the current counters.
    fn counts(&self) -> CircuitCounts;

    /// Forces the breaker closed and clears counters.
    fn reset(&self);

    /// Forces the breaker open.
    fn trip(&self);
}

/// Settings for [`ThresholdCircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    #[serde(alias = "max_failures")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before probing.
    #[serde(with = "serde_millis")]
    pub reset_timeout: Duration,
    /// Probe calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Optional per-call timeout; an expired call counts as a failure.
    #[serde(default, with = "optional_millis", alias = "timeout")]
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Checks thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker.success_threshold", "must be at least 1"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("circuit_breaker.half_open_max_calls", "must be at least 1"));
        }
        if self.success_threshold > self.half_open_max_calls {
            return Err(ConfigError::invalid(
                "circuit_breaker.success_threshold",
                "must not exceed half_open_max_calls",
            ));
        }
        Ok(())
    }
}

mod optional_millis {
    use super::{serde_millis, Duration};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serde_millis::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "serde_millis")] Duration);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    counts: CircuitCounts,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    generation: u64,
}

/// A breaker that opens after consecutive failures.
///
/// Closed: opens once `failure_threshold` consecutive calls fail.
/// Open: rejects calls until `reset_timeout` has passed, then turns half-open.
/// Half-open: admits up to `half_open_max_calls` probes; closes after
/// `success_threshold` consecutive successes and re-opens on any failure.
/// Results of calls admitted before a state change are ignored.
#[derive(Debug)]
pub struct ThresholdCircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl ThresholdCircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                counts: CircuitCounts::default(),
                opened_at: None,
                half_open_admitted: 0,
                generation: 0,
            }),
        })
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
            if elapsed >= self.config.reset_timeout {
                self.transition(inner, CircuitState::HalfOpen, now);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.half_open_admitted = 0;
        inner.counts.consecutive_failures = 0;
        inner.counts.consecutive_successes = 0;
        inner.opened_at = (to == CircuitState::Open).then_some(now);

        match to {
            CircuitState::Open => warn!(breaker = %self.name, %from, %to, "Circuit breaker opened"),
            _ => info!(breaker = %self.name, %from, %to, "Circuit breaker state changed"),
        }
    }

    fn admit(&self) -> Result<Admission<'_>, LayerflowError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        match inner.state {
            CircuitState::Open => return Err(LayerflowError::CircuitOpen),
            CircuitState::HalfOpen => {
                if inner.half_open_admitted >= self.config.half_open_max_calls {
                    return Err(LayerflowError::CircuitOpen);
                }
                inner.half_open_admitted += 1;
            }
            CircuitState::Closed => {}
        }
        inner.counts.requests += 1;
        Ok(Admission {
            breaker: self,
            generation: inner.generation,
            settled: false,
        })
    }

    /// Gives back a half-open slot whose call never finished.
    fn release(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_admitted = inner.half_open_admitted.saturating_sub(1);
        }
    }

    fn record(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        let now = Instant::now();
        if success {
            inner.counts.total_successes += 1;
            inner.counts.consecutive_successes += 1;
            inner.counts.consecutive_failures = 0;
            if inner.state == CircuitState::HalfOpen
                && inner.counts.consecutive_successes >= u64::from(self.config.success_threshold)
            {
                self.transition(&mut inner, CircuitState::Closed, now);
            }
        } else {
            inner.counts.total_failures += 1;
            inner.counts.consecutive_failures += 1;
            inner.counts.consecutive_successes = 0;
            let should_open = match inner.state {
                CircuitState::Closed => {
                    inner.counts.consecutive_failures >= u64::from(self.config.failure_threshold)
                }
                CircuitState::HalfOpen => true,
                CircuitState::Open => false,
            };
            if should_open {
                self.transition(&mut inner, CircuitState::Open, now);
            }
        }
    }
}

/// An admitted call. Dropping it unsettled (the call future was dropped
/// mid-flight) hands its half-open slot back without recording an outcome.
struct Admission<'b> {
    breaker: &'b ThresholdCircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

#[async_trait]
impl CircuitBreaker for ThresholdCircuitBreaker {
    async fn call<'a>(
        &self,
        op: BoxFuture<'a, Result<Response, LayerflowError>>,
    ) -> Result<Response, LayerflowError> {
        let admission = self.admit()?;
        let result = match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .unwrap_or(Err(LayerflowError::Timeout)),
            None => op.await,
        };
        admission.settle(result.is_ok());
        result
    }

    fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    fn counts(&self) -> CircuitCounts {
        self.inner.lock().counts
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed, Instant::now());
        inner.counts = CircuitCounts::default();
    }

    fn trip(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open, Instant::now());
    }
}

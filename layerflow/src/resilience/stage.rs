//! The resilience stage: rate limit, then retry through a circuit breaker.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    CircuitBreaker, CircuitBreakerConfig, CircuitCounts, CircuitState, RateLimitConfig,
    RetryConfig, ThresholdCircuitBreaker, TokenBucket,
};
use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::middleware::{Middleware, Next};

/// Combined settings for a [`ResilienceMiddleware`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry policy.
    pub retry: RetryConfig,
    /// Breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Optional admission limit.
    pub rate_limit: Option<RateLimitConfig>,
}

/// A read-only snapshot of a resilience stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceStats {
    /// Stage name.
    pub name: String,
    /// Whether the stage is enabled.
    pub enabled: bool,
    /// Breaker state.
    pub circuit_state: CircuitState,
    /// Breaker counters.
    pub counts: CircuitCounts,
    /// The retry policy in force.
    pub retry: RetryConfig,
    /// Whether a rate limiter is attached.
    pub rate_limited: bool,
    /// Tokens left in the limiter, when attached.
    pub available_tokens: Option<f64>,
}

/// A stage wrapping the rest of the pipeline in admission control, fault
/// isolation and bounded retry.
///
/// Each call first asks the rate limiter (a denial answers 429 and uses no
/// attempt), then runs up to `max_attempts` attempts through the breaker.
/// Failed attempts with a retryable identity wait for the backoff delay;
/// cancellation during that wait aborts the call. When attempts run out,
/// or an error is not retryable, the stage answers 500 (503 when the
/// breaker rejected the last attempt) describing the last error.
pub struct ResilienceMiddleware {
    name: String,
    enabled: AtomicBool,
    priority: AtomicI32,
    breaker: Arc<dyn CircuitBreaker>,
    retry: RwLock<RetryConfig>,
    limiter: RwLock<Option<Arc<TokenBucket>>>,
}

impl ResilienceMiddleware {
    /// Creates a stage with a [`ThresholdCircuitBreaker`].
    pub fn new(name: impl Into<String>, config: ResilienceConfig) -> Result<Self, ConfigError> {
        let name = name.into();
        let breaker = ThresholdCircuitBreaker::new(name.clone(), config.circuit_breaker)?;
        let limiter = config
            .rate_limit
            .as_ref()
            .map(TokenBucket::from_config)
            .transpose()?;
        Self::with_breaker(name, Arc::new(breaker), config.retry, limiter)
    }

    /// Creates a stage around any breaker implementation.
    pub fn with_breaker(
        name: impl Into<String>,
        breaker: Arc<dyn CircuitBreaker>,
        retry: RetryConfig,
        limiter: Option<TokenBucket>,
    ) -> Result<Self, ConfigError> {
        retry.validate()?;
        Ok(Self {
            name: name.into(),
            enabled: AtomicBool::new(true),
            priority: AtomicI32::new(0),
            breaker,
            retry: RwLock::new(retry),
            limiter: RwLock::new(limiter.map(Arc::new)),
        })
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(self, priority: i32) -> Self {
        self.priority.store(priority, Ordering::SeqCst);
        self
    }

    /// Enables or disables the stage.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Replaces the rate limiter.
    pub fn set_rate_limiter(&self, limiter: Option<TokenBucket>) {
        *self.limiter.write() = limiter.map(Arc::new);
    }

    /// Returns the retry policy in force.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.read().clone()
    }

    /// Returns the breaker.
    #[must_use]
    pub fn breaker(&self) -> &Arc<dyn CircuitBreaker> {
        &self.breaker
    }

    /// Forces the breaker closed.
    pub fn reset(&self) {
        self.breaker.reset();
    }

    /// Forces the breaker open.
    pub fn trip(&self) {
        self.breaker.trip();
    }

    /// Returns a snapshot of breaker, retry and limiter state.
    #[must_use]
    pub fn stats(&self) -> ResilienceStats {
        let limiter = self.limiter.read().clone();
        ResilienceStats {
            name: self.name.clone(),
            enabled: self.enabled(),
            circuit_state: self.breaker.state(),
            counts: self.breaker.counts(),
            retry: self.retry_config(),
            rate_limited: limiter.is_some(),
            available_tokens: limiter.map(|l| l.available()),
        }
    }

    fn apply_retry_section(&self, section: &StageOptions) -> Result<(), ConfigError> {
        let mut retry = self.retry_config();
        if let Some(v) = section.get_u32("max_attempts")? {
            retry.max_attempts = v;
        }
        if let Some(v) = section.get_duration("initial_delay")? {
            retry.initial_delay = v;
        }
        if let Some(v) = section.get_duration("max_delay")? {
            retry.max_delay = v;
        }
        if let Some(v) = section.get_f64("backoff_factor")? {
            retry.backoff_factor = v;
        }
        if let Some(v) = section.get_f64("jitter_factor")? {
            retry.jitter_factor = v;
        }
        if section.get("retryable_errors").is_some() {
            retry.retryable_errors = section
                .deserialize::<RetryableErrors>()?
                .retryable_errors;
        }
        retry.validate()?;
        *self.retry.write() = retry;
        Ok(())
    }
}

#[derive(Deserialize)]
struct RetryableErrors {
    retryable_errors: Vec<String>,
}

#[async_trait]
impl Middleware for ResilienceMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        if !self.enabled() {
            return next.run(ctx, req).await;
        }

        let limiter = self.limiter.read().clone();
        if let Some(limiter) = limiter {
            if !limiter.allow() {
                warn!(stage = %self.name, request_id = %req.id, "Rate limit exceeded");
                return Ok(Response::error(&req, 429, LayerflowError::RateLimited.to_string()));
            }
        }

        let retry = self.retry_config();
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;
            let call = next.clone().run(ctx, req.clone()).boxed();
            let error = match self.breaker.call(call).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts || !retry.is_retryable(&error) {
                break error;
            }

            let delay = retry.delay(attempt);
            debug!(
                stage = %self.name,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying after error"
            );
            tokio::select! {
                err = ctx.done() => {
                    debug!(stage = %self.name, attempt, "Retry wait cancelled");
                    return Err(err.into());
                }
                () = tokio::time::sleep(delay) => {}
            }
        };

        let status = if last_error == LayerflowError::CircuitOpen { 503 } else { 500 };
        let summary = LayerflowError::RetriesExhausted {
            attempts: attempt,
            last_error: last_error.to_string(),
        };
        warn!(stage = %self.name, attempts = attempt, error = %last_error, "Giving up after failed attempts");
        Ok(Response::error(&req, status, summary.to_string())
            .with_metadata("attempts", attempt.into())
            .with_metadata("last_error_code", last_error.code().into()))
    }

    fn configure(&self, options: &StageOptions) -> Result<(), ConfigError> {
        if let Some(enabled) = options.get_bool("enabled")? {
            self.set_enabled(enabled);
        }
        if let Some(priority) = options.get_i64("priority")? {
            let priority = i32::try_from(priority)
                .map_err(|_| ConfigError::invalid("priority", "out of range"))?;
            self.priority.store(priority, Ordering::SeqCst);
        }
        if let Some(section) = options.section("retry")? {
            self.apply_retry_section(&section)?;
        }
        if let Some(section) = options.section("rate_limit")? {
            let tokens = section.get_f64("tokens_per_second")?;
            let bucket = section.get_u32("bucket_size")?;
            if let (Some(tokens_per_second), Some(bucket_size)) = (tokens, bucket) {
                let config = RateLimitConfig {
                    tokens_per_second,
                    bucket_size,
                };
                self.set_rate_limiter(Some(TokenBucket::from_config(&config)?));
            }
        }
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn priority(&self) -> i32 {
        self.priority.load(Ordering::SeqCst)
    }

    fn resilience_stats(&self) -> Option<ResilienceStats> {
        Some(self.stats())
    }
}

impl std::fmt::Debug for ResilienceMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMiddleware")
            .field("name", &self.name)
            .field("enabled", &self.enabled())
            .field("circuit_state", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::testing::{failing_handler, flaky_handler, ok_handler, CallCounter};
    use std::time::Duration;
    use tokio::time::Instant;

    fn fast_retry(attempts: u32) -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryConfig::new()
                .with_max_attempts(attempts)
                .with_initial_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(100)),
            ..ResilienceConfig::default()
        }
    }

    async fn call(stage: &ResilienceMiddleware, next: Next) -> Result<Response, LayerflowError> {
        stage
            .process(&CallContext::background(), Request::get("/"), next)
            .await
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let stage = ResilienceMiddleware::new("res", fast_retry(3)).unwrap();
        let counter = CallCounter::new();
        let handler = flaky_handler(2, "timeout", counter.clone());

        let start = Instant::now();
        let resp = call(&stage, Next::handler(handler)).await.unwrap();

        assert_eq!(resp.status_code, 200);
        assert_eq!(counter.get(), 3);
        // 10ms after attempt 1, 20ms after attempt 2
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let stage = ResilienceMiddleware::new("res", fast_retry(5)).unwrap();
        let counter = CallCounter::new();
        let resp = call(&stage, Next::handler(failing_handler("bad request", counter.clone())))
            .await
            .unwrap();

        assert_eq!(resp.status_code, 500);
        assert_eq!(counter.get(), 1);
        assert_eq!(resp.metadata["attempts"], 1);
        assert!(resp.error.unwrap().contains("bad request"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_last_error() {
        let stage = ResilienceMiddleware::new("res", fast_retry(3)).unwrap();
        let counter = CallCounter::new();
        let resp = call(&stage, Next::handler(failing_handler("timeout", counter.clone())))
            .await
            .unwrap();

        assert_eq!(counter.get(), 3);
        assert_eq!(resp.status_code, 500);
        assert_eq!(
            resp.error.as_deref(),
            Some("max retry attempts (3) exceeded, last error: timeout")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits_without_attempt() {
        let mut config = fast_retry(3);
        config.rate_limit = Some(RateLimitConfig {
            tokens_per_second: 0.0,
            bucket_size: 1,
        });
        let stage = ResilienceMiddleware::new("res", config).unwrap();
        let counter = CallCounter::new();

        let first = call(&stage, Next::handler(crate::testing::counting_handler(counter.clone())))
            .await
            .unwrap();
        let second = call(&stage, Next::handler(crate::testing::counting_handler(counter.clone())))
            .await
            .unwrap();

        assert_eq!(first.status_code, 200);
        assert_eq!(second.status_code, 429);
        assert_eq!(counter.get(), 1);
        assert_eq!(stage.stats().counts.requests, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_calling_downstream() {
        let mut config = fast_retry(1);
        config.circuit_breaker.failure_threshold = 2;
        let stage = ResilienceMiddleware::new("res", config).unwrap();
        let counter = CallCounter::new();

        for _ in 0..2 {
            call(&stage, Next::handler(failing_handler("boom", counter.clone())))
                .await
                .unwrap();
        }
        assert_eq!(stage.stats().circuit_state, CircuitState::Open);

        let resp = call(&stage, Next::handler(failing_handler("boom", counter.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status_code, 503);
        assert_eq!(counter.get(), 2);

        stage.reset();
        let resp = call(&stage, Next::handler(ok_handler())).await.unwrap();
        assert_eq!(resp.status_code, 200);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let config = ResilienceConfig {
            retry: RetryConfig::new()
                .with_max_attempts(5)
                .with_initial_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(5)),
            ..ResilienceConfig::default()
        };
        let stage = ResilienceMiddleware::new("res", config).unwrap();
        let ctx = CallContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("client gone");
        });

        let counter = CallCounter::new();
        let err = stage
            .process(&ctx, Request::get("/"), Next::handler(failing_handler("timeout", counter.clone())))
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(counter.get(), 1);
    }

    #[tokio::test]
    async fn test_disabled_stage_passes_through() {
        let stage = ResilienceMiddleware::new("res", fast_retry(3)).unwrap();
        stage.set_enabled(false);
        let counter = CallCounter::new();
        let resp = call(&stage, Next::handler(failing_handler("timeout", counter.clone()))).await;
        assert_eq!(resp.unwrap_err(), LayerflowError::stage("timeout"));
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_configure_overrides() {
        let stage = ResilienceMiddleware::new("res", ResilienceConfig::default()).unwrap();
        let options = StageOptions::from_value(serde_json::json!({
            "enabled": true,
            "priority": 50,
            "retry": {
                "max_attempts": 6,
                "initial_delay": "20ms",
                "max_delay": "1s",
                "backoff_factor": 3.0,
                "retryable_errors": ["overloaded"]
            },
            "rate_limit": {"tokens_per_second": 10, "bucket_size": 20}
        }))
        .unwrap();

        stage.configure(&options).unwrap();

        let stats = stage.stats();
        assert_eq!(stage.priority(), 50);
        assert_eq!(stats.retry.max_attempts, 6);
        assert_eq!(stats.retry.initial_delay, Duration::from_millis(20));
        assert_eq!(stats.retry.retryable_errors, vec!["overloaded"]);
        assert!(stats.rate_limited);
    }

    #[test]
    fn test_configure_rejects_invalid_retry() {
        let stage = ResilienceMiddleware::new("res", ResilienceConfig::default()).unwrap();
        let options = StageOptions::new().with("retry", serde_json::json!({"max_attempts": 0}));
        assert!(stage.configure(&options).is_err());
        assert_eq!(stage.retry_config().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_panicking_downstream_counts_as_failure() {
        let stage = ResilienceMiddleware::new("res", fast_retry(2)).unwrap();
        let handler = handler_fn(|_ctx, _req| async { panic!("downstream bug") });
        let resp = call(&stage, Next::handler(handler)).await.unwrap();
        assert_eq!(resp.status_code, 500);
        assert_eq!(stage.stats().counts.total_failures, 1);
    }
}

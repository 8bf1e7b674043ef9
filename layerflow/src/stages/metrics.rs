//! Request counters and latency for one pipeline position.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::Controls;
use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::middleware::{Middleware, Next};

/// A point-in-time copy of a [`MetricsMiddleware`]'s counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Requests seen.
    pub requests: u64,
    /// Requests that ended in an error or a 5xx response.
    pub errors: u64,
    /// `errors / requests`, 0 when idle.
    pub error_rate: f64,
    /// Mean latency in milliseconds.
    pub average_latency_ms: f64,
    /// Slowest request in milliseconds.
    pub max_latency_ms: f64,
    /// Responses by status code.
    pub status_counts: BTreeMap<u16, u64>,
    /// Errors by error code.
    pub error_codes: BTreeMap<String, u64>,
}

/// Counts requests, errors and latency of everything downstream.
#[derive(Debug)]
pub struct MetricsMiddleware {
    name: String,
    controls: Controls,
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    status_counts: DashMap<u16, u64>,
    error_codes: DashMap<String, u64>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new("metrics")
    }
}

impl MetricsMiddleware {
    /// Creates a metrics stage with priority 5.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            controls: Controls::new(5),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            max_latency_us: AtomicU64::new(0),
            status_counts: DashMap::new(),
            error_codes: DashMap::new(),
        }
    }

    fn record(&self, outcome: &Result<Response, LayerflowError>, latency_us: u64) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.total_latency_us.fetch_add(latency_us, Ordering::SeqCst);
        self.max_latency_us.fetch_max(latency_us, Ordering::SeqCst);
        match outcome {
            Ok(resp) => {
                *self.status_counts.entry(resp.status_code).or_insert(0) += 1;
                if resp.status_code >= 500 {
                    self.errors.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                *self.error_codes.entry(err.code().to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Copies the current counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::SeqCst);
        let errors = self.errors.load(Ordering::SeqCst);
        let total_us = self.total_latency_us.load(Ordering::SeqCst);
        let (error_rate, average_latency_ms) = if requests == 0 {
            (0.0, 0.0)
        } else {
            (
                errors as f64 / requests as f64,
                total_us as f64 / requests as f64 / 1000.0,
            )
        };
        MetricsSnapshot {
            requests,
            errors,
            error_rate,
            average_latency_ms,
            max_latency_ms: self.max_latency_us.load(Ordering::SeqCst) as f64 / 1000.0,
            status_counts: self.status_counts.iter().map(|e| (*e.key(), *e.value())).collect(),
            error_codes: self
                .error_codes
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.requests.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
        self.total_latency_us.store(0, Ordering::SeqCst);
        self.max_latency_us.store(0, Ordering::SeqCst);
        self.status_counts.clear();
        self.error_codes.clear();
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        let start = Instant::now();
        let outcome = next.run(ctx, req).await;
        let latency_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.record(&outcome, latency_us);
        outcome
    }

    fn configure(&self, options: &StageOptions) -> Result<(), ConfigError> {
        self.controls.apply(options)?;
        if options.get_bool("reset")?.unwrap_or(false) {
            self.reset();
        }
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.controls.enabled()
    }

    fn priority(&self) -> i32 {
        self.controls.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failing_handler, ok_handler, CallCounter};
    use crate::middleware::handler_fn;
    use pretty_assertions::assert_eq;

    async fn run(stage: &MetricsMiddleware, next: Next) -> Result<Response, LayerflowError> {
        stage.process(&CallContext::background(), Request::get("/"), next).await
    }

    #[tokio::test]
    async fn test_counts_outcomes() {
        let stage = MetricsMiddleware::default();
        run(&stage, Next::handler(ok_handler())).await.unwrap();
        run(&stage, Next::handler(ok_handler())).await.unwrap();
        run(&stage, Next::handler(handler_fn(|_ctx, req| async move {
            Ok(Response::error(&req, 503, "down"))
        })))
        .await
        .unwrap();
        run(&stage, Next::handler(failing_handler("timeout", CallCounter::new())))
            .await
            .unwrap_err();

        let snap = stage.snapshot();
        assert_eq!(snap.requests, 4);
        assert_eq!(snap.errors, 2);
        assert!((snap.error_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.status_counts, BTreeMap::from([(200, 2), (503, 1)]));
        assert_eq!(snap.error_codes, BTreeMap::from([("stage".to_string(), 1)]));
        assert!(snap.max_latency_ms >= snap.average_latency_ms);
    }

    #[tokio::test]
    async fn test_reset_through_configure() {
        let stage = MetricsMiddleware::default();
        run(&stage, Next::handler(ok_handler())).await.unwrap();
        stage
            .configure(&StageOptions::new().with("reset", true).with("enabled", false))
            .unwrap();
        assert_eq!(stage.snapshot().requests, 0);
        assert!(!stage.enabled());
    }
}

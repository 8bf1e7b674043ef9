//! Latency and outcome aggregation for dependency-ordered pipelines.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::duration::serde_millis;

/// Weight of the newest sample in the latency average.
pub const LATENCY_EMA_ALPHA: f64 = 0.1;

/// A read-only copy of the manager's performance counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Requests processed.
    pub total_requests: u64,
    /// Requests that produced an error-free response.
    pub successful_requests: u64,
    /// All other requests.
    pub failed_requests: u64,
    /// Exponential moving average of latency.
    #[serde(with = "serde_millis")]
    pub average_latency: Duration,
    /// Requests per second since the first sample.
    pub throughput_per_second: f64,
}

#[derive(Debug)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    average_secs: f64,
    first_sample: Option<Instant>,
}

/// Thread-safe accumulator behind [`PerformanceMetrics`].
///
/// The first sample seeds the average; each later one folds in as
/// `α·sample + (1-α)·average` with α = [`LATENCY_EMA_ALPHA`].
#[derive(Debug)]
pub struct PerformanceTracker {
    counters: Mutex<Counters>,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self {
            counters: Mutex::new(Counters {
                total: 0,
                successful: 0,
                failed: 0,
                average_secs: 0.0,
                first_sample: None,
            }),
        }
    }
}

impl PerformanceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one request into the counters.
    pub fn record(&self, latency: Duration, success: bool) {
        let mut c = self.counters.lock();
        c.total += 1;
        if success {
            c.successful += 1;
        } else {
            c.failed += 1;
        }
        let sample = latency.as_secs_f64();
        c.average_secs = if c.total == 1 {
            sample
        } else {
            LATENCY_EMA_ALPHA.mul_add(sample, (1.0 - LATENCY_EMA_ALPHA) * c.average_secs)
        };
        c.first_sample.get_or_insert_with(Instant::now);
    }

    /// Copies the counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> PerformanceMetrics {
        let c = self.counters.lock();
        let throughput = c
            .first_sample
            .map(|first| first.elapsed().as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map_or(0.0, |secs| c.total as f64 / secs);
        PerformanceMetrics {
            total_requests: c.total,
            successful_requests: c.successful,
            failed_requests: c.failed,
            average_latency: Duration::from_secs_f64(c.average_secs),
            throughput_per_second: throughput,
        }
    }
}

//! Latency measurement for stages and pipelines.

use std::time::{Duration, Instant};
use tracing::trace;

/// Measures the wall-clock time of one named operation.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns its duration.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        trace!(span = %self.name, duration_ms = elapsed.as_secs_f64() * 1000.0, "Span finished");
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("test_span");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.name(), "test_span");
        assert!(timer.elapsed_ms() >= 5.0);
        assert!(timer.finish() >= Duration::from_millis(5));
    }
}

//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::LayerflowError;
use crate::middleware::{Middleware, Next};

/// A log shared between recording stages.
pub type SharedLog = Arc<Mutex<Vec<String>>>;

/// A stage that counts calls and either delegates or answers a fixed status.
#[derive(Debug)]
pub struct MockMiddleware {
    name: String,
    priority: i32,
    enabled: AtomicBool,
    short_circuit: Mutex<Option<u16>>,
    call_count: AtomicUsize,
    paths: Mutex<Vec<String>>,
}

impl MockMiddleware {
    /// Creates a delegating mock.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            enabled: AtomicBool::new(true),
            short_circuit: Mutex::new(None),
            call_count: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Answers `status` instead of delegating.
    pub fn respond_with(&self, status: u16) {
        *self.short_circuit.lock() = Some(status);
    }

    /// Enables or disables the stage.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns the number of times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the request paths seen, in call order.
    #[must_use]
    pub fn recorded_paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        self.paths.lock().clear();
    }
}

#[async_trait]
impl Middleware for MockMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().push(req.path.clone());
        let status = *self.short_circuit.lock();
        match status {
            Some(status) => Ok(Response::new(&req, status)),
            None => next.run(ctx, req).await,
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// A stage that appends its name to a shared log, then delegates.
#[derive(Debug)]
pub struct RecordingMiddleware {
    name: String,
    priority: i32,
    enabled: AtomicBool,
    log: SharedLog,
}

impl RecordingMiddleware {
    /// Creates a recording stage writing to `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32, log: SharedLog) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: AtomicBool::new(true),
            log,
        }
    }

    /// Creates an empty shared log.
    #[must_use]
    pub fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Enables or disables the stage.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        self.log.lock().push(self.name.clone());
        next.run(ctx, req).await
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// A stage that always fails without delegating.
#[derive(Debug)]
pub struct FailingMiddleware {
    name: String,
    error: String,
}

impl FailingMiddleware {
    /// Creates a stage failing with `error`.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Middleware for FailingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _ctx: &CallContext,
        _req: Request,
        _next: Next,
    ) -> Result<Response, LayerflowError> {
        Err(LayerflowError::stage(self.error.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Chain;
    use crate::testing::ok_handler;

    #[tokio::test]
    async fn test_mock_middleware() {
        let mock = Arc::new(MockMiddleware::new("mock"));
        let chain = Chain::with_handler(ok_handler());
        chain.add(mock.clone());
        let ctx = CallContext::background();

        let resp = chain.process(&ctx, Request::get("/a")).await.unwrap();
        assert_eq!(resp.status_code, 200);

        mock.respond_with(401);
        let resp = chain.process(&ctx, Request::get("/b")).await.unwrap();
        assert_eq!(resp.status_code, 401);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.recorded_paths(), vec!["/a", "/b"]);

        mock.reset();
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_recording_middleware() {
        let log = RecordingMiddleware::shared_log();
        let stage = RecordingMiddleware::new("rec", 3, log.clone());
        assert_eq!(stage.priority(), 3);

        stage
            .process(&CallContext::background(), Request::get("/"), Next::handler(ok_handler()))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["rec"]);
    }

    #[tokio::test]
    async fn test_failing_middleware() {
        let stage = FailingMiddleware::new("bad", "connection refused");
        let err = stage
            .process(&CallContext::background(), Request::get("/"), Next::handler(ok_handler()))
            .await
            .unwrap_err();
        assert_eq!(err.identity(), "connection refused");
    }
}

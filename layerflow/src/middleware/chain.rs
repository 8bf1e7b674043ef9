//! Priority-ordered middleware chain.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

use super::{Handler, Middleware, Next};
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::LayerflowError;

/// An ordered list of stages ending at a handler.
///
/// Stages are kept sorted by descending priority; stages with equal
/// priority keep their insertion order. Adding a stage whose name is
/// already present replaces the old one.
#[derive(Default)]
pub struct Chain {
    stages: RwLock<Vec<Arc<dyn Middleware>>>,
    handler: RwLock<Option<Handler>>,
}

impl Chain {
    /// Creates an empty chain without a handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty chain ending at `handler`.
    #[must_use]
    pub fn with_handler(handler: Handler) -> Self {
        Self {
            stages: RwLock::new(Vec::new()),
            handler: RwLock::new(Some(handler)),
        }
    }

    /// Replaces the terminal handler.
    pub fn set_handler(&self, handler: Handler) {
        *self.handler.write() = Some(handler);
    }

    /// Adds a stage at its priority position.
    pub fn add(&self, stage: Arc<dyn Middleware>) {
        let mut stages = self.stages.write();
        stages.retain(|s| s.name() != stage.name());
        let priority = stage.priority();
        let position = stages
            .iter()
            .position(|s| s.priority() < priority)
            .unwrap_or(stages.len());
        stages.insert(position, stage);
    }

    /// Removes a stage by name, returning whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        let mut stages = self.stages.write();
        let before = stages.len();
        stages.retain(|s| s.name() != name);
        stages.len() != before
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.stages.read().iter().find(|s| s.name() == name).cloned()
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.stages.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Returns a snapshot of the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<Arc<dyn Middleware>> {
        self.stages.read().clone()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    /// Returns true if the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }

    /// Returns the number of enabled stages.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.stages.read().iter().filter(|s| s.enabled()).count()
    }

    /// Removes every stage.
    pub fn clear(&self) {
        self.stages.write().clear();
    }

    /// Returns the terminal handler.
    #[must_use]
    pub fn handler(&self) -> Option<Handler> {
        self.handler.read().clone()
    }

    /// Threads a request through the enabled stages to the handler.
    ///
    /// The response duration is stamped with the wall-clock time of the
    /// whole call unless a stage already set it.
    pub async fn process(&self, ctx: &CallContext, req: Request) -> Result<Response, LayerflowError> {
        let next = Next::new(self.stages(), self.handler());
        run_timed(next, ctx, req).await
    }
}

/// Runs a continuation and stamps the response duration.
pub(crate) async fn run_timed(
    next: Next,
    ctx: &CallContext,
    req: Request,
) -> Result<Response, LayerflowError> {
    let start = Instant::now();
    let mut resp = next.run(ctx, req).await?;
    if resp.duration.is_zero() {
        resp.duration = start.elapsed();
    }
    Ok(resp)
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.names())
            .field("has_handler", &self.handler.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler_fn, FnMiddleware};
    use crate::testing::{ok_handler, RecordingMiddleware};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_stages_run_in_priority_order() {
        let log = RecordingMiddleware::shared_log();
        let chain = Chain::with_handler(ok_handler());
        chain.add(Arc::new(RecordingMiddleware::new("low", 1, log.clone())));
        chain.add(Arc::new(RecordingMiddleware::new("high", 10, log.clone())));
        chain.add(Arc::new(RecordingMiddleware::new("mid", 5, log.clone())));

        assert_eq!(chain.names(), vec!["high", "mid", "low"]);

        let resp = chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(*log.lock(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_insertion_order() {
        let chain = Chain::new();
        chain.add(Arc::new(FnMiddleware::passthrough("a")));
        chain.add(Arc::new(FnMiddleware::passthrough("b")));
        chain.add(Arc::new(FnMiddleware::passthrough("c")));
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_disabled_stage_is_skipped() {
        let log = RecordingMiddleware::shared_log();
        let chain = Chain::with_handler(ok_handler());
        let skipped = Arc::new(RecordingMiddleware::new("skipped", 5, log.clone()));
        skipped.set_enabled(false);
        chain.add(skipped);
        chain.add(Arc::new(RecordingMiddleware::new("kept", 1, log.clone())));

        chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(chain.active_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_answers_404() {
        let chain = Chain::new();
        let resp = chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(resp.status_code, 404);
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let chain = Chain::with_handler(handler_fn(|_ctx, _req| async {
            panic!("handler must not run")
        }));
        chain.add(Arc::new(FnMiddleware::new("deny", |_ctx, req, _next| async move {
            Ok(Response::error(&req, 401, "unauthorized"))
        })));

        let resp = chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(resp.status_code, 401);
    }

    #[tokio::test]
    async fn test_stage_annotates_request() {
        let chain = Chain::with_handler(handler_fn(|_ctx, req| async move {
            Ok(Response::ok(&req).with_body(req.metadata["user_id"].clone()))
        }));
        chain.add(Arc::new(FnMiddleware::new("auth", |ctx, mut req, next| async move {
            req.metadata.insert("user_id".to_string(), json!("u-42"));
            next.run(&ctx, req).await
        })));

        let resp = chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(resp.body, json!("u-42"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_error() {
        let chain = Chain::with_handler(handler_fn(|_ctx, _req| async { panic!("kaboom") }));
        let err = chain
            .process(&CallContext::background(), Request::get("/"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LayerflowError::Panicked {
                stage: "handler".to_string(),
                message: "kaboom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_duration_is_stamped() {
        let chain = Chain::with_handler(crate::testing::slow_handler(std::time::Duration::from_millis(20)));
        let resp = chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert!(resp.duration >= std::time::Duration::from_millis(20));
    }

    #[test]
    fn test_add_replaces_same_name_and_remove() {
        let chain = Chain::new();
        chain.add(Arc::new(FnMiddleware::passthrough("a")));
        chain.add(Arc::new(FnMiddleware::passthrough("a")));
        assert_eq!(chain.len(), 1);
        assert!(chain.get("a").is_some());
        assert!(chain.remove("a"));
        assert!(!chain.remove("a"));
        assert!(chain.is_empty());
    }
}

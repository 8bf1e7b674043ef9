//! Closure-backed stages.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use super::{Middleware, Next};
use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};

type StageFn = Arc<
    dyn Fn(CallContext, Request, Next) -> BoxFuture<'static, Result<Response, LayerflowError>>
        + Send
        + Sync,
>;

/// A stage backed by an async closure.
///
/// `configure` understands `enabled` and `priority`.
pub struct FnMiddleware {
    name: String,
    enabled: AtomicBool,
    priority: AtomicI32,
    func: StageFn,
}

impl FnMiddleware {
    /// Creates a new closure stage.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallContext, Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, LayerflowError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(true),
            priority: AtomicI32::new(0),
            func: Arc::new(move |ctx, req, next| func(ctx, req, next).boxed()),
        }
    }

    /// Creates a stage that only delegates.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, |ctx, req, next| async move { next.run(&ctx, req).await })
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
}

#[async_trait]
impl Middleware for FnMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        (self.func)(ctx.clone(), req, next).await
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
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn priority(&self) -> i32 {
        self.priority.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FnMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .field("enabled", &self.enabled())
            .field("priority", &self.priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ok_handler;

    #[tokio::test]
    async fn test_fn_middleware_delegates() {
        let stage = FnMiddleware::passthrough("pass");
        let resp = stage
            .process(&CallContext::background(), Request::get("/"), Next::handler(ok_handler()))
            .await
            .unwrap();
        assert_eq!(resp.status_code, 200);
    }

    #[test]
    fn test_configure_enabled_and_priority() {
        let stage = FnMiddleware::passthrough("pass").with_priority(3);
        assert_eq!(stage.priority(), 3);

        let options = StageOptions::new().with("enabled", false).with("priority", 9);
        stage.configure(&options).unwrap();
        assert!(!stage.enabled());
        assert_eq!(stage.priority(), 9);
    }

    #[test]
    fn test_configure_rejects_bad_priority() {
        let stage = FnMiddleware::passthrough("pass");
        let options = StageOptions::new().with("priority", "high");
        assert!(stage.configure(&options).is_err());
    }
}

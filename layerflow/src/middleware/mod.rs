//! The stage contract and the ordered chain that threads a call through it.
//!
//! A stage ([`Middleware`]) receives the call context, the request and a
//! [`Next`] continuation. It may short-circuit by returning its own
//! response, or delegate by calling [`Next::run`]. The continuation skips
//! disabled stages and ends at the terminal [`Handler`].

mod chain;
mod function;
mod next;

pub use chain::Chain;
pub(crate) use chain::run_timed;
pub use function::FnMiddleware;
pub use next::Next;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::resilience::ResilienceStats;
use crate::utils::panic_message;

/// Trait for pipeline stages.
///
/// Implementations keep any mutable state (counters, breakers, limiters)
/// behind interior mutability; the pipeline only ever holds them through an
/// `Arc<dyn Middleware>`.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Returns the stage name, unique within a pipeline.
    fn name(&self) -> &str;

    /// Processes a request, optionally delegating to `next`.
    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError>;

    /// Applies runtime configuration.
    fn configure(&self, options: &StageOptions) -> Result<(), ConfigError> {
        let _ = options;
        Ok(())
    }

    /// Returns whether the stage participates in calls.
    fn enabled(&self) -> bool {
        true
    }

    /// Returns the stage priority (higher runs earlier).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns a resilience snapshot for stages that carry one.
    fn resilience_stats(&self) -> Option<ResilienceStats> {
        None
    }
}

/// The terminal request handler at the end of a chain.
pub type Handler = Arc<
    dyn Fn(CallContext, Request) -> BoxFuture<'static, Result<Response, LayerflowError>>
        + Send
        + Sync,
>;

/// Wraps an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, LayerflowError>> + Send + 'static,
{
    Arc::new(move |ctx, req| f(ctx, req).boxed())
}

/// Runs a stage or handler future, converting a panic into an error.
pub(crate) async fn guarded<F>(label: &str, fut: F) -> Result<Response, LayerflowError>
where
    F: Future<Output = Result<Response, LayerflowError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(stage = label, panic = %message, "Stage panicked");
            Err(LayerflowError::Panicked {
                stage: label.to_string(),
                message,
            })
        }
    }
}

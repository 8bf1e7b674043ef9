//! The continuation handed to each stage.

use std::sync::Arc;
use tracing::trace;

use super::{guarded, Handler, Middleware};
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::LayerflowError;

/// The remainder of a pipeline, from the current position to the handler.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    handler: Option<Handler>,
}

impl Next {
    /// Creates a continuation over `stages` ending at `handler`.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Middleware>>, handler: Option<Handler>) -> Self {
        Self {
            stages: stages.into(),
            index: 0,
            handler,
        }
    }

    /// Creates a continuation that goes straight to the handler.
    #[must_use]
    pub fn handler(handler: Handler) -> Self {
        Self::new(Vec::new(), Some(handler))
    }

    /// Returns the number of stages left, including disabled ones.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len().saturating_sub(self.index)
    }

    /// Runs the next enabled stage, or the handler once stages are exhausted.
    ///
    /// Without a handler the call ends with a 404 response. A panic in a
    /// stage or in the handler is returned as [`LayerflowError::Panicked`].
    pub async fn run(self, ctx: &CallContext, req: Request) -> Result<Response, LayerflowError> {
        let mut index = self.index;
        while let Some(stage) = self.stages.get(index) {
            if !stage.enabled() {
                trace!(stage = stage.name(), "Skipping disabled stage");
                index += 1;
                continue;
            }
            let next = Self {
                stages: Arc::clone(&self.stages),
                index: index + 1,
                handler: self.handler.clone(),
            };
            return guarded(stage.name(), stage.process(ctx, req, next)).await;
        }

        match self.handler {
            Some(handler) => guarded("handler", handler(ctx.clone(), req)).await,
            None => Ok(Response::error(&req, 404, "no handler configured")),
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("stages", &self.stages.len())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

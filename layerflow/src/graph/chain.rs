//! A chain whose stage order comes from a dependency graph.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

use super::{DependencyCondition, DependencyGraph, DependencyReport};
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{GraphError, LayerflowError};
use crate::middleware::{run_timed, Handler, Middleware, Next};

/// A pipeline ordered by declared dependencies instead of priority.
///
/// Each call resolves the order for its own request (conditions may prune
/// stages), then threads the request through the enabled stages to the
/// handler.
#[derive(Default)]
pub struct DependencyChain {
    graph: DependencyGraph,
    handler: RwLock<Option<Handler>>,
}

impl DependencyChain {
    /// Creates a chain without a handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain ending at `handler`.
    #[must_use]
    pub fn with_handler(handler: Handler) -> Self {
        Self {
            graph: DependencyGraph::new(),
            handler: RwLock::new(Some(handler)),
        }
    }

    /// Replaces the terminal handler.
    pub fn set_handler(&self, handler: Handler) {
        *self.handler.write() = Some(handler);
    }

    /// Registers a stage that always applies.
    pub fn add<I, S>(&self, stage: Arc<dyn Middleware>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph.add(stage, dependencies);
    }

    /// Registers a stage with full options.
    pub fn add_node<I, S>(
        &self,
        stage: Arc<dyn Middleware>,
        dependencies: I,
        optional: bool,
        condition: Arc<dyn DependencyCondition>,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph.add_node(stage, dependencies, optional, condition);
    }

    /// Removes a stage.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Middleware>, GraphError> {
        self.graph.remove_node(name)
    }

    /// Returns the underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Resolves the stages that apply to a request.
    pub fn resolve_order(
        &self,
        ctx: &CallContext,
        req: &Request,
    ) -> Result<Vec<Arc<dyn Middleware>>, GraphError> {
        self.graph.resolve_order(ctx, req)
    }

    /// Lists graph errors.
    #[must_use]
    pub fn validate(&self) -> Vec<GraphError> {
        self.graph.validate()
    }

    /// Builds a structural report.
    #[must_use]
    pub fn report(&self) -> DependencyReport {
        self.graph.report()
    }

    /// Returns the number of enabled stages.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.graph.stages().iter().filter(|s| s.enabled()).count()
    }

    /// Resolves the order for this request and runs it.
    pub async fn process(&self, ctx: &CallContext, req: Request) -> Result<Response, LayerflowError> {
        let stages = self.graph.resolve_order(ctx, &req).map_err(|e| {
            warn!(request_id = %req.id, error = %e, "Dependency resolution failed");
            e
        })?;
        let handler = self.handler.read().clone();
        run_timed(Next::new(stages, handler), ctx, req).await
    }
}

impl std::fmt::Debug for DependencyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyChain")
            .field("graph", &self.graph)
            .field("has_handler", &self.handler.read().is_some())
            .finish()
    }
}

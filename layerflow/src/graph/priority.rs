//! Dependency edges derived from stage priority.

use std::sync::Arc;

use super::{DependencyGraph, DependencyReport};
use crate::context::CallContext;
use crate::core::Request;
use crate::errors::GraphError;
use crate::middleware::Middleware;

/// A dependency graph where higher-priority stages run first.
///
/// Every stage depends on each registered stage with a strictly higher
/// priority. Stages with equal priority are independent of each other.
#[derive(Debug, Default)]
pub struct PriorityGraph {
    graph: DependencyGraph,
}

impl PriorityGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage, wiring edges to and from existing stages by priority.
    ///
    /// Re-adding a name replaces the stage and drops its old edges.
    pub fn add(&self, stage: Arc<dyn Middleware>) -> Result<(), GraphError> {
        let name = stage.name().to_string();
        let priority = stage.priority();
        if self.graph.contains(&name) {
            self.graph.remove_node(&name)?;
        }
        let existing: Vec<Arc<dyn Middleware>> = self
            .graph
            .stages()
            .into_iter()
            .filter(|s| s.name() != name)
            .collect();

        let dependencies: Vec<String> = existing
            .iter()
            .filter(|s| s.priority() > priority)
            .map(|s| s.name().to_string())
            .collect();
        self.graph.add(stage, dependencies);

        for lower in existing.iter().filter(|s| s.priority() < priority) {
            self.graph.add_dependency(lower.name(), &name)?;
        }
        Ok(())
    }

    /// Removes a stage.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Middleware>, GraphError> {
        self.graph.remove_node(name)
    }

    /// Resolves the stages in priority order.
    pub fn resolve_order(
        &self,
        ctx: &CallContext,
        req: &Request,
    ) -> Result<Vec<Arc<dyn Middleware>>, GraphError> {
        self.graph.resolve_order(ctx, req)
    }

    /// Returns the underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Builds a structural report.
    #[must_use]
    pub fn report(&self) -> DependencyReport {
        self.graph.report()
    }
}

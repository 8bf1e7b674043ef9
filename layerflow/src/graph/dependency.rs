//! Dependency graph over named stages with cached topological order.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::condition::{AlwaysCondition, DependencyCondition};
use crate::context::CallContext;
use crate::core::Request;
use crate::errors::GraphError;
use crate::middleware::Middleware;

/// One stage in a [`DependencyGraph`].
#[derive(Clone)]
pub struct DependencyNode {
    stage: Arc<dyn Middleware>,
    dependencies: Vec<String>,
    dependents: Vec<String>,
    optional: bool,
    condition: Arc<dyn DependencyCondition>,
}

impl DependencyNode {
    /// Returns the wrapped stage.
    #[must_use]
    pub fn stage(&self) -> &Arc<dyn Middleware> {
        &self.stage
    }

    /// Returns the names this node must run after.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns the names that must run after this node.
    #[must_use]
    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    /// Returns whether missing dependencies are tolerated.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// Returns the applicability condition.
    #[must_use]
    pub fn condition(&self) -> &Arc<dyn DependencyCondition> {
        &self.condition
    }
}

impl std::fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyNode")
            .field("name", &self.stage.name())
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("optional", &self.optional)
            .field("condition", &self.condition.describe())
            .finish()
    }
}

/// Per-node entry of a [`DependencyReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Stage name.
    pub name: String,
    /// Declared dependencies.
    pub dependencies: Vec<String>,
    /// Known dependents.
    pub dependents: Vec<String>,
    /// Whether missing dependencies are tolerated.
    pub optional: bool,
    /// Condition description.
    pub condition: String,
    /// Whether the stage is enabled.
    pub enabled: bool,
}

/// Structure and health of one dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Number of nodes.
    pub node_count: usize,
    /// Nodes in registration order.
    pub nodes: Vec<NodeReport>,
    /// Full resolved order, when the graph resolves.
    pub resolved_order: Option<Vec<String>>,
    /// Validation errors.
    pub errors: Vec<GraphError>,
}

#[derive(Default)]
struct GraphState {
    /// Registration order; drives DFS visitation.
    order: Vec<String>,
    nodes: HashMap<String, DependencyNode>,
    resolved: Option<Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl GraphState {
    /// Iterative depth-first topological sort over all nodes.
    ///
    /// With `lenient`, missing required dependencies are skipped instead of
    /// failing, so cycles can still be reported.
    fn topological_order(&self, lenient: bool) -> Result<Vec<String>, GraphError> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in &self.order {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            marks.insert(root.as_str(), Mark::InProgress);
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];

            while let Some(top) = stack.last_mut() {
                let (name, index) = *top;
                let Some(node) = self.nodes.get(name) else {
                    return Err(GraphError::NotFound(name.to_string()));
                };

                let Some(dep) = node.dependencies.get(index) else {
                    marks.insert(name, Mark::Done);
                    order.push(name.to_string());
                    stack.pop();
                    continue;
                };
                top.1 += 1;

                if !self.nodes.contains_key(dep) {
                    if node.optional || lenient {
                        continue;
                    }
                    return Err(GraphError::MissingDependency {
                        stage: name.to_string(),
                        dependency: dep.clone(),
                    });
                }

                match marks.get(dep.as_str()) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        let start = stack.iter().position(|(n, _)| *n == dep.as_str()).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(n, _)| (*n).to_string()).collect();
                        path.push(dep.clone());
                        return Err(GraphError::Cycle {
                            stage: dep.clone(),
                            path,
                        });
                    }
                    None => {
                        marks.insert(dep.as_str(), Mark::InProgress);
                        stack.push((dep.as_str(), 0));
                    }
                }
            }
        }

        Ok(order)
    }

    fn missing_dependencies(&self) -> Vec<GraphError> {
        let mut errors = Vec::new();
        for name in &self.order {
            let Some(node) = self.nodes.get(name) else { continue };
            if node.optional {
                continue;
            }
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    errors.push(GraphError::MissingDependency {
                        stage: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        errors
    }

    fn filter(&self, order: &[String], ctx: &CallContext, req: &Request) -> Vec<Arc<dyn Middleware>> {
        order
            .iter()
            .filter_map(|name| self.nodes.get(name))
            .filter(|node| node.condition.should_apply(ctx, req))
            .map(|node| Arc::clone(&node.stage))
            .collect()
    }

    fn detach(&mut self, name: &str) -> Option<DependencyNode> {
        let node = self.nodes.remove(name)?;
        self.order.retain(|n| n != name);
        for dep in &node.dependencies {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.retain(|n| n != name);
            }
        }
        for dependent in &node.dependents {
            if let Some(dependent_node) = self.nodes.get_mut(dependent) {
                dependent_node.dependencies.retain(|n| n != name);
            }
        }
        Some(node)
    }
}

/// Orders named stages so each runs after its required dependencies.
///
/// The full topological order is computed once and cached until the graph
/// changes. Conditions never affect the cached order; they only prune it
/// per request, so dependency order is preserved in every filtered view.
/// Among independent nodes the order is some valid topological order.
#[derive(Default)]
pub struct DependencyGraph {
    state: RwLock<GraphState>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage that always applies and requires its dependencies.
    pub fn add<I, S>(&self, stage: Arc<dyn Middleware>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_node(stage, dependencies, false, Arc::new(AlwaysCondition));
    }

    /// Registers a stage.
    ///
    /// Dependencies need not exist yet; missing ones are reported at
    /// resolution time. A node with the same name is replaced.
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
        let name = stage.name().to_string();
        let mut dependencies: Vec<String> = dependencies.into_iter().map(Into::into).collect();
        dedup_in_place(&mut dependencies);

        let mut state = self.state.write();
        if let Some(old) = state.nodes.get(&name) {
            let stale: Vec<String> = old
                .dependencies
                .iter()
                .filter(|d| !dependencies.contains(d))
                .cloned()
                .collect();
            for dep in stale {
                if let Some(dep_node) = state.nodes.get_mut(&dep) {
                    dep_node.dependents.retain(|n| *n != name);
                }
            }
        } else {
            state.order.push(name.clone());
        }

        for dep in &dependencies {
            if let Some(dep_node) = state.nodes.get_mut(dep) {
                if !dep_node.dependents.contains(&name) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        // Nodes registered earlier may already name this one.
        let dependents: Vec<String> = state
            .order
            .iter()
            .filter(|n| **n != name)
            .filter(|n| {
                state
                    .nodes
                    .get(*n)
                    .is_some_and(|node| node.dependencies.contains(&name))
            })
            .cloned()
            .collect();

        state.nodes.insert(
            name,
            DependencyNode {
                stage,
                dependencies,
                dependents,
                optional,
                condition,
            },
        );
        state.resolved = None;
    }

    /// Adds one dependency edge to an existing node.
    pub fn add_dependency(&self, name: &str, dependency: &str) -> Result<(), GraphError> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(name)
            .ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        if node.dependencies.iter().any(|d| d == dependency) {
            return Ok(());
        }
        node.dependencies.push(dependency.to_string());
        if let Some(dep_node) = state.nodes.get_mut(dependency) {
            if !dep_node.dependents.iter().any(|d| d == name) {
                dep_node.dependents.push(name.to_string());
            }
        }
        state.resolved = None;
        Ok(())
    }

    /// Removes a node and every edge that touches it.
    pub fn remove_node(&self, name: &str) -> Result<Arc<dyn Middleware>, GraphError> {
        let mut state = self.state.write();
        let node = state
            .detach(name)
            .ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        state.resolved = None;
        Ok(node.stage)
    }

    /// Returns the stages that apply to this call, in dependency order.
    pub fn resolve_order(
        &self,
        ctx: &CallContext,
        req: &Request,
    ) -> Result<Vec<Arc<dyn Middleware>>, GraphError> {
        {
            let state = self.state.read();
            if let Some(order) = &state.resolved {
                return Ok(state.filter(order, ctx, req));
            }
        }

        let mut state = self.state.write();
        let order = match state.resolved.take() {
            Some(order) => order,
            None => state.topological_order(false)?,
        };
        let stages = state.filter(&order, ctx, req);
        state.resolved = Some(order);
        Ok(stages)
    }

    /// Returns the cached full order, if resolved.
    #[must_use]
    pub fn cached_order(&self) -> Option<Vec<String>> {
        self.state.read().resolved.clone()
    }

    /// Lists every missing required dependency and any cycle.
    ///
    /// No request is involved: conditions do not take part in validation.
    #[must_use]
    pub fn validate(&self) -> Vec<GraphError> {
        let state = self.state.read();
        let mut errors = state.missing_dependencies();
        if let Err(err) = state.topological_order(true) {
            errors.push(err);
        }
        errors
    }

    /// Returns the dependencies of a node.
    pub fn dependencies(&self, name: &str) -> Result<Vec<String>, GraphError> {
        self.state
            .read()
            .nodes
            .get(name)
            .map(|n| n.dependencies.clone())
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    /// Returns the dependents of a node.
    pub fn dependents(&self, name: &str) -> Result<Vec<String>, GraphError> {
        self.state
            .read()
            .nodes
            .get(name)
            .map(|n| n.dependents.clone())
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    /// Returns a copy of a node.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<DependencyNode> {
        self.state.read().nodes.get(name).cloned()
    }

    /// Returns the stage registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.state.read().nodes.get(name).map(|n| Arc::clone(&n.stage))
    }

    /// Returns all stages in registration order.
    #[must_use]
    pub fn stages(&self) -> Vec<Arc<dyn Middleware>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|n| state.nodes.get(n))
            .map(|n| Arc::clone(&n.stage))
            .collect()
    }

    /// Returns node names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Returns whether a node is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.state.read().nodes.contains_key(name)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }

    /// Builds a structural report.
    #[must_use]
    pub fn report(&self) -> DependencyReport {
        let errors = self.validate();
        let state = self.state.read();
        let nodes = state
            .order
            .iter()
            .filter_map(|n| state.nodes.get(n))
            .map(|node| NodeReport {
                name: node.stage.name().to_string(),
                dependencies: node.dependencies.clone(),
                dependents: node.dependents.clone(),
                optional: node.optional,
                condition: node.condition.describe(),
                enabled: node.stage.enabled(),
            })
            .collect();
        let resolved_order = if errors.is_empty() {
            state.topological_order(false).ok()
        } else {
            None
        };
        DependencyReport {
            node_count: state.nodes.len(),
            nodes,
            resolved_order,
            errors,
        }
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.names())
            .field("resolved", &self.cached_order())
            .finish()
    }
}

fn dedup_in_place(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::condition::{MockDependencyCondition, PathCondition};
    use crate::middleware::FnMiddleware;
    use pretty_assertions::assert_eq;

    fn stage(name: &str) -> Arc<dyn Middleware> {
        Arc::new(FnMiddleware::passthrough(name))
    }

    fn names(stages: &[Arc<dyn Middleware>]) -> Vec<String> {
        stages.iter().map(|s| s.name().to_string()).collect()
    }

    fn resolve(graph: &DependencyGraph, path: &str) -> Result<Vec<String>, GraphError> {
        graph
            .resolve_order(&CallContext::background(), &Request::get(path))
            .map(|s| names(&s))
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_linear_chain_resolves_in_order() {
        let graph = DependencyGraph::new();
        graph.add(stage("metrics"), ["logging"]);
        graph.add(stage("logging"), ["auth"]);
        graph.add(stage("auth"), Vec::<String>::new());

        assert_eq!(resolve(&graph, "/").unwrap(), vec!["auth", "logging", "metrics"]);
    }

    #[test]
    fn test_dependencies_precede_dependents_in_diamond() {
        let graph = DependencyGraph::new();
        graph.add(stage("d"), ["b", "c"]);
        graph.add(stage("b"), ["a"]);
        graph.add(stage("c"), ["a"]);
        graph.add(stage("a"), Vec::<String>::new());
        graph.add(stage("lonely"), Vec::<String>::new());

        let order = resolve(&graph, "/").unwrap();
        assert_eq!(order.len(), 5);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "a") < position(&order, "c"));
        assert!(position(&order, "b") < position(&order, "d"));
        assert!(position(&order, "c") < position(&order, "d"));
    }

    #[test]
    fn test_mutual_dependency_is_cycle() {
        let graph = DependencyGraph::new();
        graph.add(stage("a"), ["b"]);
        graph.add(stage("b"), ["a"]);

        let err = resolve(&graph, "/").unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        if let GraphError::Cycle { path, .. } = err {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 3);
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let graph = DependencyGraph::new();
        graph.add(stage("a"), ["a"]);
        assert!(matches!(resolve(&graph, "/"), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let graph = DependencyGraph::new();
        let depth = 5_000;
        // Registered deepest-first so the DFS starts at the far end.
        for i in (0..depth).rev() {
            let deps = if i == 0 { vec![] } else { vec![format!("s{}", i - 1)] };
            graph.add(stage(&format!("s{i}")), deps);
        }
        let order = resolve(&graph, "/").unwrap();
        assert_eq!(order.len(), depth);
        assert_eq!(order[0], "s0");
        assert_eq!(order[depth - 1], format!("s{}", depth - 1));
    }

    #[test]
    fn test_missing_required_dependency() {
        let graph = DependencyGraph::new();
        graph.add(stage("metrics"), ["logging"]);

        assert_eq!(
            resolve(&graph, "/").unwrap_err(),
            GraphError::MissingDependency {
                stage: "metrics".to_string(),
                dependency: "logging".to_string(),
            }
        );
        assert_eq!(graph.validate().len(), 1);
    }

    #[test]
    fn test_optional_missing_dependency_is_tolerated() {
        let graph = DependencyGraph::new();
        graph.add_node(stage("cache"), ["redis"], true, Arc::new(AlwaysCondition));
        assert_eq!(resolve(&graph, "/").unwrap(), vec!["cache"]);
        assert!(graph.validate().is_empty());
    }

    #[test]
    fn test_dependency_added_later_resolves() {
        let graph = DependencyGraph::new();
        graph.add(stage("logging"), ["auth"]);
        assert!(resolve(&graph, "/").is_err());

        graph.add(stage("auth"), Vec::<String>::new());
        assert_eq!(resolve(&graph, "/").unwrap(), vec!["auth", "logging"]);
        assert_eq!(graph.dependents("auth").unwrap(), vec!["logging"]);
    }

    #[test]
    fn test_path_condition_filters_per_request() {
        let graph = DependencyGraph::new();
        graph.add(stage("auth"), Vec::<String>::new());
        graph.add_node(
            stage("admin"),
            ["auth"],
            false,
            Arc::new(PathCondition::new(["/admin/*"])),
        );

        assert_eq!(resolve(&graph, "/public").unwrap(), vec!["auth"]);
        assert_eq!(resolve(&graph, "/admin/users").unwrap(), vec!["auth", "admin"]);
        assert_eq!(resolve(&graph, "/public").unwrap(), vec!["auth"]);
    }

    #[test]
    fn test_condition_is_consulted_per_request() {
        let mut cond = MockDependencyCondition::new();
        cond.expect_should_apply()
            .times(2)
            .returning(|_ctx, req| req.path == "/yes");

        let graph = DependencyGraph::new();
        graph.add_node(stage("gated"), Vec::<String>::new(), false, Arc::new(cond));

        assert_eq!(resolve(&graph, "/yes").unwrap(), vec!["gated"]);
        assert!(resolve(&graph, "/no").unwrap().is_empty());
    }

    #[test]
    fn test_cache_invalidated_on_change() {
        let graph = DependencyGraph::new();
        graph.add(stage("a"), Vec::<String>::new());
        resolve(&graph, "/").unwrap();
        assert_eq!(graph.cached_order(), Some(vec!["a".to_string()]));

        graph.add(stage("b"), ["a"]);
        assert!(graph.cached_order().is_none());
        assert_eq!(resolve(&graph, "/").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_node_strips_edges() {
        let graph = DependencyGraph::new();
        graph.add(stage("auth"), Vec::<String>::new());
        graph.add(stage("logging"), ["auth"]);
        graph.add(stage("metrics"), ["logging"]);

        graph.remove_node("logging").unwrap();

        assert_eq!(graph.dependents("auth").unwrap(), Vec::<String>::new());
        assert_eq!(graph.dependencies("metrics").unwrap(), Vec::<String>::new());
        assert_eq!(
            graph.remove_node("logging").err(),
            Some(GraphError::NotFound("logging".to_string()))
        );
        assert_eq!(resolve(&graph, "/").unwrap().len(), 2);
    }

    #[test]
    fn test_readding_replaces_node() {
        let graph = DependencyGraph::new();
        graph.add(stage("a"), Vec::<String>::new());
        graph.add(stage("b"), Vec::<String>::new());
        graph.add(stage("c"), ["a"]);
        graph.add(stage("c"), ["b"]);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("c").unwrap(), vec!["b"]);
        assert!(graph.dependents("a").unwrap().is_empty());
        assert_eq!(graph.dependents("b").unwrap(), vec!["c"]);
    }

    #[test]
    fn test_validate_reports_cycle_and_missing_once() {
        let graph = DependencyGraph::new();
        graph.add(stage("a"), ["b"]);
        graph.add(stage("b"), ["a"]);
        graph.add(stage("c"), ["ghost"]);

        let errors = graph.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| matches!(e, GraphError::MissingDependency { .. })));
        assert!(errors.iter().any(|e| matches!(e, GraphError::Cycle { .. })));
    }

    #[test]
    fn test_accessors_report_not_found() {
        let graph = DependencyGraph::new();
        assert!(matches!(graph.dependencies("x"), Err(GraphError::NotFound(_))));
        assert!(matches!(graph.dependents("x"), Err(GraphError::NotFound(_))));
        assert!(graph.add_dependency("x", "y").is_err());
    }

    #[test]
    fn test_report() {
        let graph = DependencyGraph::new();
        graph.add(stage("auth"), Vec::<String>::new());
        graph.add(stage("logging"), ["auth"]);

        let report = graph.report();
        assert_eq!(report.node_count, 2);
        assert_eq!(report.nodes[1].dependencies, vec!["auth"]);
        assert_eq!(report.nodes[0].dependents, vec!["logging"]);
        assert_eq!(report.nodes[0].condition, "always");
        assert_eq!(
            report.resolved_order,
            Some(vec!["auth".to_string(), "logging".to_string()])
        );
        assert!(report.errors.is_empty());
    }
}

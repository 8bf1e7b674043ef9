//! Dependency-aware stage ordering.
//!
//! A [`DependencyGraph`] orders named stages by their declared
//! dependencies using an iterative depth-first topological sort, reports
//! cycles and missing dependencies, and prunes the cached order per request
//! through [`DependencyCondition`]s.

mod chain;
mod condition;
mod dependency;
mod priority;

pub use chain::DependencyChain;
#[cfg(test)]
pub use condition::MockDependencyCondition;
pub use condition::{
    match_path, AlwaysCondition, DependencyCondition, PathCondition, PredicateCondition,
};
pub use dependency::{DependencyGraph, DependencyNode, DependencyReport, NodeReport};
pub use priority::PriorityGraph;

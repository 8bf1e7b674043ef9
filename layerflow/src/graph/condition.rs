//! Per-request applicability of dependency nodes.

use std::fmt;
use std::sync::Arc;

use crate::context::CallContext;
use crate::core::Request;

/// Decides whether a node applies to a given call.
#[cfg_attr(test, mockall::automock)]
pub trait DependencyCondition: Send + Sync {
    /// Returns true if the node should run for this call.
    fn should_apply(&self, ctx: &CallContext, req: &Request) -> bool;

    /// Short human-readable description, used in reports.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// Applies to every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCondition;

impl DependencyCondition for AlwaysCondition {
    fn should_apply(&self, _ctx: &CallContext, _req: &Request) -> bool {
        true
    }

    fn describe(&self) -> String {
        "always".to_string()
    }
}

/// Applies when the request path matches any of the patterns.
///
/// See [`match_path`] for the pattern syntax.
#[derive(Debug, Clone, Default)]
pub struct PathCondition {
    patterns: Vec<String>,
}

impl PathCondition {
    /// Creates a condition from patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl DependencyCondition for PathCondition {
    fn should_apply(&self, _ctx: &CallContext, req: &Request) -> bool {
        self.patterns.iter().any(|p| match_path(&req.path, p))
    }

    fn describe(&self) -> String {
        format!("path({})", self.patterns.join(", "))
    }
}

/// Applies when a predicate returns true.
#[derive(Clone)]
pub struct PredicateCondition {
    predicate: Arc<dyn Fn(&CallContext, &Request) -> bool + Send + Sync>,
}

impl PredicateCondition {
    /// Wraps a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&CallContext, &Request) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl DependencyCondition for PredicateCondition {
    fn should_apply(&self, ctx: &CallContext, req: &Request) -> bool {
        (self.predicate)(ctx, req)
    }

    fn describe(&self) -> String {
        "predicate".to_string()
    }
}

impl fmt::Debug for PredicateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PredicateCondition")
    }
}

/// Matches a path against a pattern.
///
/// `*` alone matches everything. A pattern with exactly one `*` matches
/// paths that start with the part before it and end with the part after
/// it. Anything else must match exactly.
#[must_use]
pub fn match_path(path: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let mut parts = pattern.split('*');
    if let (Some(prefix), Some(suffix), None) = (parts.next(), parts.next(), parts.next()) {
        return path.len() >= prefix.len() + suffix.len()
            && path.starts_with(prefix)
            && path.ends_with(suffix);
    }
    path == pattern
}

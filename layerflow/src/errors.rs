//! Error types for the layerflow framework.
//!
//! Setup failures (graph and configuration errors) are kept apart from the
//! operational outcomes a caller sees at request time (rate limiting, open
//! breakers, timeouts, exhausted retries). Every error carries a stable
//! string identity used by the retry allowlist and a coarse code used in
//! health and metrics output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for layerflow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerflowError {
    /// A dependency graph error.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The call context was cancelled or its deadline passed.
    #[error("{0}")]
    Context(#[from] ContextError),

    /// Admission was denied by a rate limiter.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The circuit breaker is short-circuiting calls.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// An execution ran longer than its configured timeout.
    #[error("timeout")]
    Timeout,

    /// All retry attempts failed.
    #[error("max retry attempts ({attempts}) exceeded, last error: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Display form of the last underlying error.
        last_error: String,
    },

    /// A stage or handler reported a failure.
    #[error("{0}")]
    Stage(String),

    /// No pipeline is registered under the given name.
    #[error("pipeline {0} not found")]
    PipelineNotFound(String),

    /// A stage or handler panicked; the panic was caught at the chain boundary.
    #[error("stage {stage} panicked: {message}")]
    Panicked {
        /// The stage (or `handler`) that panicked.
        stage: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// A completion slot received a second outcome.
    #[error("completion slot already completed")]
    AlreadyCompleted,

    /// The async chain no longer accepts submissions.
    #[error("async chain is shut down")]
    ShutDown,

    /// The stage pool has been closed.
    #[error("stage pool is closed")]
    PoolClosed,
}

impl LayerflowError {
    /// Creates a stage failure from a message.
    pub fn stage(message: impl Into<String>) -> Self {
        Self::Stage(message.into())
    }

    /// Returns the stable string identity of this error.
    ///
    /// Stage failures are identified by their message, so a handler that
    /// fails with `"connection refused"` matches that retryable identity.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::Graph(e) => e.identity().to_string(),
            Self::Config(_) => "configuration error".to_string(),
            Self::Context(e) => e.identity().to_string(),
            Self::RateLimited => "rate limit exceeded".to_string(),
            Self::CircuitOpen => "circuit breaker is open".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::RetriesExhausted { .. } => "retries exhausted".to_string(),
            Self::Stage(message) => message.clone(),
            Self::PipelineNotFound(_) => "pipeline not found".to_string(),
            Self::Panicked { .. } => "panicked".to_string(),
            Self::AlreadyCompleted => "already completed".to_string(),
            Self::ShutDown => "shut down".to_string(),
            Self::PoolClosed => "pool closed".to_string(),
        }
    }

    /// Returns a coarse error code for metrics and health output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Graph(e) => e.code(),
            Self::Config(_) => "config",
            Self::Context(e) => e.code(),
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Stage(_) => "stage",
            Self::PipelineNotFound(_) => "pipeline_not_found",
            Self::Panicked { .. } => "panicked",
            Self::AlreadyCompleted => "already_completed",
            Self::ShutDown => "shut_down",
            Self::PoolClosed => "pool_closed",
        }
    }

    /// Returns true for cancellation and deadline errors.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(_))
    }
}

/// Errors raised while building or resolving a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GraphError {
    /// A dependency cycle was found.
    #[error("circular dependency detected involving {stage}: {}", .path.join(" -> "))]
    Cycle {
        /// The stage that was revisited while still in progress.
        stage: String,
        /// The cycle, starting and ending at `stage`.
        path: Vec<String>,
    },

    /// A required dependency is not registered.
    #[error("required dependency {dependency} not found for {stage}")]
    MissingDependency {
        /// The dependent stage.
        stage: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The named stage is not in the graph.
    #[error("stage {0} not found")]
    NotFound(String),
}

impl GraphError {
    /// Returns the stable string identity of this error.
    #[must_use]
    pub const fn identity(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "circular dependency",
            Self::MissingDependency { .. } => "missing dependency",
            Self::NotFound(_) => "not found",
        }
    }

    /// Returns a coarse error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => "graph_cycle",
            Self::MissingDependency { .. } => "graph_missing_dependency",
            Self::NotFound(_) => "graph_not_found",
        }
    }
}

/// Errors raised while applying configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field is present but has an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        /// The offending field, dotted for nested sections.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A required field is absent.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// No factory is registered for the stage type.
    #[error("unknown stage type: {0}")]
    UnknownType(String),

    /// The configuration document could not be decoded.
    #[error("malformed configuration: {0}")]
    Malformed(String),
}

impl ConfigError {
    /// Creates an invalid field error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Why a call context finished.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly.
    #[error("context cancelled: {0}")]
    Cancelled(String),

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// Returns the stable string identity of this error.
    #[must_use]
    pub const fn identity(&self) -> &'static str {
        match self {
            Self::Cancelled(_) => "context cancelled",
            Self::DeadlineExceeded => "context deadline exceeded",
        }
    }

    /// Returns a coarse error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Cancelled(_) => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = LayerflowError> = std::result::Result<T, E>;

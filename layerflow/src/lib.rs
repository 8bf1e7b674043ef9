//! # Layerflow
//!
//! Composable request middleware pipelines for Rust.
//!
//! Layerflow threads a [`Request`](core::Request) through ordered stages
//! that wrap a terminal handler. It provides:
//!
//! - **Priority chains**: stages run from highest to lowest priority
//! - **Dependency chains**: stages run in topological order, filtered per
//!   request by path or custom conditions, with cycle detection
//! - **Bounded async execution**: a concurrency cap, per-call timeouts,
//!   batch dispatch and graceful shutdown
//! - **Resilience**: token-bucket admission, exponential-backoff retry and
//!   a circuit breaker in one stage
//! - **Orchestration**: a manager that owns named pipelines, builds them
//!   from configuration and reports health and latency
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use layerflow::prelude::*;
//!
//! let manager = Manager::new();
//! let chain = manager.create_dependency_chain("api", handler_fn(|_ctx, req| async move {
//!     Ok(Response::ok(&req))
//! }));
//! chain.add(Arc::new(RequestIdMiddleware::new("request_id")), Vec::<String>::new());
//! chain.add(Arc::new(LoggingMiddleware::new("logging")), ["request_id"]);
//!
//! let resp = manager
//!     .process_with_dependencies("api", &CallContext::background(), Request::get("/orders"))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod graph;
pub mod manager;
pub mod middleware;
pub mod observability;
pub mod resilience;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::concurrency::{AsyncChain, BatchProcessor, BatchResult, CompletionSlot};
    pub use crate::config::{ManagerConfig, ResilienceConfig, StageConfig, StageOptions};
    pub use crate::context::CallContext;
    pub use crate::core::{Request, Response};
    pub use crate::errors::{ConfigError, ContextError, GraphError, LayerflowError};
    pub use crate::graph::{
        AlwaysCondition, DependencyChain, DependencyCondition, PathCondition, PriorityGraph,
    };
    pub use crate::manager::{FactoryRegistry, HealthStatus, Manager};
    pub use crate::middleware::{handler_fn, Chain, Handler, Middleware, Next};
    pub use crate::observability::{init_logging, LogConfig};
    pub use crate::resilience::{ResilienceMiddleware, RetryConfig};
    pub use crate::stages::{LoggingMiddleware, MetricsMiddleware, RequestIdMiddleware};
    pub use std::sync::Arc;
}

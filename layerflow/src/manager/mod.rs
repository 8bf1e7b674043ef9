//! The orchestration manager and its supporting pieces.
//!
//! A [`Manager`] owns named pipelines, builds them from configuration
//! through a [`FactoryRegistry`], and aggregates their performance and
//! health signals.

mod health;
#[allow(clippy::module_inception)]
mod manager;
mod metrics;
mod registry;


pub use health::HealthStatus;
pub use manager::{Manager, DEFAULT_CHAIN};
pub use metrics::{PerformanceMetrics, PerformanceTracker, LATENCY_EMA_ALPHA};
pub use registry::{FactoryRegistry, StageFactory};

//! Health snapshot of a manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::GraphError;

/// Pipeline counts and dependency problems at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// False when any dependency-ordered pipeline has validation errors.
    pub healthy: bool,
    /// Synchronous chains, including the default one.
    pub regular_chains: usize,
    /// Bounded-concurrency chains.
    pub async_chains: usize,
    /// Dependency-ordered chains.
    pub dependency_chains: usize,
    /// Enabled stages across every pipeline.
    pub active_stages: usize,
    /// Validation errors per dependency-ordered pipeline; only pipelines
    /// with errors appear.
    pub dependency_errors: BTreeMap<String, Vec<GraphError>>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    /// Total number of pipelines.
    #[must_use]
    pub const fn pipeline_count(&self) -> usize {
        self.regular_chains + self.async_chains + self.dependency_chains
    }
}

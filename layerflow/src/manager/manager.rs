//! Orchestration of named pipelines.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{FactoryRegistry, HealthStatus, PerformanceMetrics, PerformanceTracker};
use crate::concurrency::{
    AsyncChain, AsyncStagePool, AsyncStats, BatchProcessor, BatchResult, CompletionSlot,
    StageBuilder,
};
use crate::config::{
    default_batch_size, ConditionKind, DependencyStageConfig, HandlerConfig, ManagerConfig,
    ResilienceConfig, StageConfig,
};
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, GraphError, LayerflowError};
use crate::graph::{
    AlwaysCondition, DependencyChain, DependencyCondition, DependencyReport, PathCondition,
};
use crate::middleware::{Chain, Handler, Middleware};
use crate::resilience::{ResilienceMiddleware, ResilienceStats};

/// Name of the synchronous chain every manager starts with.
pub const DEFAULT_CHAIN: &str = "default";

/// Owns named pipelines of three kinds and the signals they produce.
///
/// - synchronous chains, run on the caller's task in priority order;
/// - async chains, run off the caller's task under a concurrency cap;
/// - dependency chains, run in resolved topological order.
///
/// Names are independent per kind, so one name may refer to a pipeline of
/// each kind at once.
pub struct Manager {
    chains: DashMap<String, Arc<Chain>>,
    async_chains: DashMap<String, Arc<AsyncChain>>,
    dependency_chains: DashMap<String, Arc<DependencyChain>>,
    batch_processors: DashMap<String, Arc<BatchProcessor>>,
    pools: DashMap<String, Arc<AsyncStagePool>>,
    performance: DashMap<String, Arc<PerformanceTracker>>,
    registry: FactoryRegistry,
    batch_size: AtomicUsize,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// Creates a manager with the built-in stage factories and a
    /// [`DEFAULT_CHAIN`] answering 200.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(FactoryRegistry::with_builtins())
    }

    /// Creates a manager that builds configured stages from `registry`.
    #[must_use]
    pub fn with_registry(registry: FactoryRegistry) -> Self {
        let manager = Self {
            chains: DashMap::new(),
            async_chains: DashMap::new(),
            dependency_chains: DashMap::new(),
            batch_processors: DashMap::new(),
            pools: DashMap::new(),
            performance: DashMap::new(),
            registry,
            batch_size: AtomicUsize::new(default_batch_size()),
        };
        manager.create_chain(DEFAULT_CHAIN, HandlerConfig::default().build());
        manager
    }

    /// The stage factory registry.
    #[must_use]
    pub const fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    /// Group size for batch processors created from now on.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::SeqCst)
    }

    /// Sets the batch size and drops cached processors.
    pub fn set_batch_size(&self, batch_size: usize) {
        self.batch_size.store(batch_size.max(1), Ordering::SeqCst);
        self.batch_processors.clear();
    }

    /// Creates or replaces a synchronous chain.
    pub fn create_chain(&self, name: impl Into<String>, handler: Handler) -> Arc<Chain> {
        let name = name.into();
        let chain = Arc::new(Chain::with_handler(handler));
        self.chains.insert(name.clone(), Arc::clone(&chain));
        debug!(chain = %name, "Created chain");
        chain
    }

    /// Creates or replaces an async chain.
    pub fn create_async_chain(
        &self,
        name: impl Into<String>,
        handler: Handler,
        max_concurrency: usize,
        timeout: Duration,
    ) -> Result<Arc<AsyncChain>, ConfigError> {
        let name = name.into();
        let chain = Arc::new(AsyncChain::new(name.clone(), handler, max_concurrency, timeout)?);
        self.async_chains.insert(name.clone(), Arc::clone(&chain));
        self.batch_processors.remove(&name);
        debug!(chain = %name, max_concurrency, ?timeout, "Created async chain");
        Ok(chain)
    }

    /// Creates or replaces a dependency chain.
    pub fn create_dependency_chain(
        &self,
        name: impl Into<String>,
        handler: Handler,
    ) -> Arc<DependencyChain> {
        let name = name.into();
        let chain = Arc::new(DependencyChain::with_handler(handler));
        self.dependency_chains.insert(name.clone(), Arc::clone(&chain));
        self.performance
            .insert(name.clone(), Arc::new(PerformanceTracker::new()));
        debug!(chain = %name, "Created dependency chain");
        chain
    }

    /// Creates or replaces a stage pool; a replaced pool is closed.
    pub fn create_async_pool(
        &self,
        name: impl Into<String>,
        capacity: usize,
        timeout: Duration,
        builder: StageBuilder,
    ) -> Result<Arc<AsyncStagePool>, ConfigError> {
        let name = name.into();
        let pool = Arc::new(AsyncStagePool::new(name.clone(), capacity, timeout, builder)?);
        if let Some(old) = self.pools.insert(name, Arc::clone(&pool)) {
            old.close();
        }
        Ok(pool)
    }

    /// Returns a synchronous chain.
    #[must_use]
    pub fn chain(&self, name: &str) -> Option<Arc<Chain>> {
        self.chains.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Returns an async chain.
    #[must_use]
    pub fn async_chain(&self, name: &str) -> Option<Arc<AsyncChain>> {
        self.async_chains.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Returns a dependency chain.
    #[must_use]
    pub fn dependency_chain(&self, name: &str) -> Option<Arc<DependencyChain>> {
        self.dependency_chains.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Returns a stage pool.
    #[must_use]
    pub fn async_pool(&self, name: &str) -> Option<Arc<AsyncStagePool>> {
        self.pools.get(name).map(|p| Arc::clone(p.value()))
    }

    /// Runs a request through a synchronous chain.
    pub async fn process(
        &self,
        name: &str,
        ctx: &CallContext,
        req: Request,
    ) -> Result<Response, LayerflowError> {
        let chain = self
            .chain(name)
            .ok_or_else(|| LayerflowError::PipelineNotFound(name.to_string()))?;
        chain.process(ctx, req).await
    }

    /// Submits a request to an async chain.
    pub fn process_async(
        &self,
        name: &str,
        ctx: &CallContext,
        req: Request,
    ) -> Result<CompletionSlot, LayerflowError> {
        let chain = self
            .async_chain(name)
            .ok_or_else(|| LayerflowError::PipelineNotFound(name.to_string()))?;
        chain.process_async(ctx, req)
    }

    /// Runs a request through a dependency chain and records its latency.
    ///
    /// A call counts as successful when it returns a response without an
    /// error description.
    pub async fn process_with_dependencies(
        &self,
        name: &str,
        ctx: &CallContext,
        req: Request,
    ) -> Result<Response, LayerflowError> {
        let chain = self
            .dependency_chain(name)
            .ok_or_else(|| LayerflowError::PipelineNotFound(name.to_string()))?;
        let tracker = self
            .performance
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(PerformanceTracker::new()))
            .clone();

        let started = Instant::now();
        let result = chain.process(ctx, req).await;
        let success = matches!(&result, Ok(resp) if resp.error.is_none());
        tracker.record(started.elapsed(), success);
        result
    }

    /// Runs requests through an async chain in groups.
    ///
    /// The chain's batch processor is created on first use with the
    /// manager's batch size.
    pub async fn process_batch(
        &self,
        name: &str,
        ctx: &CallContext,
        requests: Vec<Request>,
    ) -> Result<BatchResult, LayerflowError> {
        let chain = self
            .async_chain(name)
            .ok_or_else(|| LayerflowError::PipelineNotFound(name.to_string()))?;
        let processor = self
            .batch_processors
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BatchProcessor::new(chain, self.batch_size())))
            .clone();
        Ok(processor.process(ctx, requests).await)
    }

    /// Adds one resilience stage to every pipeline named `chain`.
    ///
    /// The same instance is shared, so its breaker and limiter see the
    /// traffic of all of them.
    pub fn add_resilience_stage(
        &self,
        chain: &str,
        stage_name: impl Into<String>,
        config: ResilienceConfig,
    ) -> Result<Arc<ResilienceMiddleware>, LayerflowError> {
        let stage = Arc::new(ResilienceMiddleware::new(stage_name, config)?);
        let as_dyn: Arc<dyn Middleware> = stage.clone();
        let mut added = false;

        if let Some(c) = self.chain(chain) {
            c.add(Arc::clone(&as_dyn));
            added = true;
        }
        if let Some(c) = self.async_chain(chain) {
            c.add(Arc::clone(&as_dyn));
            added = true;
        }
        if let Some(c) = self.dependency_chain(chain) {
            c.add(Arc::clone(&as_dyn), Vec::<String>::new());
            added = true;
        }
        if !added {
            return Err(LayerflowError::PipelineNotFound(chain.to_string()));
        }
        info!(chain, stage = stage.name(), "Added resilience stage");
        Ok(stage)
    }

    /// Snapshots every resilience stage.
    ///
    /// Keys are `chain:stage`, `async:chain:stage` and `dep:chain:stage`.
    #[must_use]
    pub fn resilience_stats(&self) -> BTreeMap<String, ResilienceStats> {
        let mut out = BTreeMap::new();
        let mut collect = |prefix: &str, chain: &str, stages: Vec<Arc<dyn Middleware>>| {
            for stage in stages {
                if let Some(stats) = stage.resilience_stats() {
                    out.insert(format!("{prefix}{chain}:{}", stage.name()), stats);
                }
            }
        };
        for entry in &self.chains {
            collect("", entry.key(), entry.value().stages());
        }
        for entry in &self.async_chains {
            collect("async:", entry.key(), entry.value().stages());
        }
        for entry in &self.dependency_chains {
            collect("dep:", entry.key(), entry.value().graph().stages());
        }
        out
    }

    /// Concurrency figures per async chain.
    #[must_use]
    pub fn async_stats(&self) -> BTreeMap<String, AsyncStats> {
        self.async_chains
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }

    /// Latency and outcome counters per dependency chain.
    #[must_use]
    pub fn performance_metrics(&self) -> BTreeMap<String, PerformanceMetrics> {
        self.performance
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect()
    }

    /// Validation errors per dependency chain; chains without errors are
    /// omitted.
    #[must_use]
    pub fn validate_all_dependencies(&self) -> BTreeMap<String, Vec<GraphError>> {
        self.dependency_chains
            .iter()
            .filter_map(|e| {
                let errors = e.value().validate();
                (!errors.is_empty()).then(|| (e.key().clone(), errors))
            })
            .collect()
    }

    /// Structure of every dependency chain.
    #[must_use]
    pub fn dependency_report(&self) -> BTreeMap<String, DependencyReport> {
        self.dependency_chains
            .iter()
            .map(|e| (e.key().clone(), e.value().report()))
            .collect()
    }

    /// Takes a health snapshot.
    #[must_use]
    pub fn health_check(&self) -> HealthStatus {
        let active_stages = self.chains.iter().map(|e| e.value().active_count()).sum::<usize>()
            + self.async_chains.iter().map(|e| e.value().active_count()).sum::<usize>()
            + self
                .dependency_chains
                .iter()
                .map(|e| e.value().active_count())
                .sum::<usize>();
        let dependency_errors = self.validate_all_dependencies();

        HealthStatus {
            healthy: dependency_errors.is_empty(),
            regular_chains: self.chains.len(),
            async_chains: self.async_chains.len(),
            dependency_chains: self.dependency_chains.len(),
            active_stages,
            dependency_errors,
            timestamp: Utc::now(),
        }
    }

    /// Shuts down every async chain, then closes every pool.
    ///
    /// All chains are asked to drain even when one fails; the first
    /// failure is returned.
    pub async fn shutdown(&self, ctx: &CallContext) -> Result<(), LayerflowError> {
        let chains: Vec<_> = self
            .async_chains
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        info!(async_chains = chains.len(), pools = self.pools.len(), "Shutting down manager");

        let mut first_error = None;
        for (name, chain) in chains {
            if let Err(err) = chain.shutdown(ctx).await {
                warn!(chain = %name, error = %err, "Async chain did not shut down cleanly");
                first_error.get_or_insert(err);
            }
        }
        for pool in &self.pools {
            pool.value().close();
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Builds pipelines from configuration records.
    ///
    /// Every stage of a pipeline is built before the pipeline is created,
    /// so a failing record leaves that pipeline untouched. Pipelines
    /// earlier in the document stay applied.
    pub fn apply_configuration(&self, config: &ManagerConfig) -> Result<(), ConfigError> {
        self.set_batch_size(config.batch_size);

        for chain_config in &config.chains {
            let stages = self.build_stages(&chain_config.stages)?;
            let chain = self.create_chain(chain_config.name.clone(), chain_config.handler.build());
            for stage in stages {
                chain.add(stage);
            }
        }

        for async_config in &config.async_chains {
            async_config.validate()?;
            let stages = self.build_stages(&async_config.stages)?;
            let chain = self.create_async_chain(
                async_config.name.clone(),
                async_config.handler.build(),
                async_config.max_concurrency,
                async_config.timeout,
            )?;
            for stage in stages {
                chain.add(stage);
            }
        }

        for dep_config in &config.dependency_chains {
            let nodes = dep_config
                .stages
                .iter()
                .map(|s| {
                    s.validate()?;
                    Ok((self.registry.create(&s.stage)?, s))
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            let chain =
                self.create_dependency_chain(dep_config.name.clone(), dep_config.handler.build());
            for (stage, record) in nodes {
                chain.add_node(
                    stage,
                    record.dependencies.clone(),
                    record.optional,
                    condition_for(record),
                );
            }
        }

        info!(
            chains = config.chains.len(),
            async_chains = config.async_chains.len(),
            dependency_chains = config.dependency_chains.len(),
            "Applied configuration"
        );
        Ok(())
    }

    fn build_stages(&self, records: &[StageConfig]) -> Result<Vec<Arc<dyn Middleware>>, ConfigError> {
        records.iter().map(|r| self.registry.create(r)).collect()
    }
}

fn condition_for(record: &DependencyStageConfig) -> Arc<dyn DependencyCondition> {
    match record.condition {
        ConditionKind::Always => Arc::new(AlwaysCondition),
        ConditionKind::Path => Arc::new(PathCondition::new(record.path_patterns.clone())),
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("chains", &self.chains.len())
            .field("async_chains", &self.async_chains.len())
            .field("dependency_chains", &self.dependency_chains.len())
            .field("pools", &self.pools.len())
            .field("batch_size", &self.batch_size())
            .finish_non_exhaustive()
    }
}

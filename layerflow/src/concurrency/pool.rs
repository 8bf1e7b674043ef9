//! Async-wrapped stages and a bounded pool to reuse them.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::middleware::{guarded, Middleware, Next};

/// A stage whose processing runs on its own task under a timeout.
///
/// The rest of the pipeline (`next`) runs inside that task too, so the
/// timeout bounds everything downstream of this stage.
pub struct AsyncStage {
    inner: Arc<dyn Middleware>,
    timeout: Duration,
}

impl AsyncStage {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Middleware>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The wrapped stage.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Middleware> {
        &self.inner
    }

    /// The execution timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Middleware for AsyncStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        let stage = Arc::clone(&self.inner);
        let task_ctx = ctx.clone();
        let mut task = tokio::spawn(async move {
            let name = stage.name().to_string();
            guarded(&name, stage.process(&task_ctx, req, next)).await
        });

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => return result,
                Err(err) => Err(LayerflowError::Panicked {
                    stage: self.name().to_string(),
                    message: err.to_string(),
                }),
            },
            err = ctx.done() => Err(err.into()),
            () = tokio::time::sleep(self.timeout) => {
                warn!(stage = self.name(), timeout_ms = self.timeout.as_millis(), "Async stage timed out");
                Err(LayerflowError::Timeout)
            }
        };
        task.abort();
        outcome
    }

    fn configure(&self, options: &StageOptions) -> Result<(), ConfigError> {
        self.inner.configure(options)
    }

    fn enabled(&self) -> bool {
        self.inner.enabled()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn resilience_stats(&self) -> Option<crate::resilience::ResilienceStats> {
        self.inner.resilience_stats()
    }
}

impl std::fmt::Debug for AsyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStage")
            .field("name", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builds the stage wrapped by each pooled [`AsyncStage`].
pub type StageBuilder = Arc<dyn Fn() -> Arc<dyn Middleware> + Send + Sync>;

/// Pool occupancy figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Maximum idle instances kept.
    pub capacity: usize,
    /// Instances waiting to be handed out.
    pub idle: usize,
    /// Instances built over the pool's lifetime.
    pub created: usize,
    /// Whether the pool has been closed.
    pub closed: bool,
}

/// A bounded pool of pre-built [`AsyncStage`]s.
///
/// [`get`](Self::get) hands out an idle instance or builds a new one;
/// [`put`](Self::put) returns it while fewer than `capacity` are idle.
/// After [`close`](Self::close) the pool hands out nothing and drops
/// whatever is returned.
pub struct AsyncStagePool {
    name: String,
    capacity: usize,
    timeout: Duration,
    builder: StageBuilder,
    idle: Mutex<Vec<Arc<AsyncStage>>>,
    created: AtomicUsize,
    closed: AtomicBool,
}

impl AsyncStagePool {
    /// Creates a pool and pre-builds `capacity` instances.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        timeout: Duration,
        builder: StageBuilder,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if capacity == 0 {
            return Err(ConfigError::invalid(format!("{name}.capacity"), "must be at least 1"));
        }
        let pool = Self {
            name,
            capacity,
            timeout,
            builder,
            idle: Mutex::new(Vec::with_capacity(capacity)),
            created: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        let prebuilt: Vec<_> = (0..capacity).map(|_| pool.build()).collect();
        *pool.idle.lock() = prebuilt;
        Ok(pool)
    }

    fn build(&self) -> Arc<AsyncStage> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(AsyncStage::new((self.builder)(), self.timeout))
    }

    /// The pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands out an instance.
    pub fn get(&self) -> Result<Arc<AsyncStage>, LayerflowError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LayerflowError::PoolClosed);
        }
        let reused = self.idle.lock().pop();
        Ok(reused.unwrap_or_else(|| {
            debug!(pool = %self.name, "Pool empty, building a new stage");
            self.build()
        }))
    }

    /// Returns an instance; reports whether the pool kept it.
    pub fn put(&self, stage: Arc<AsyncStage>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.capacity {
            return false;
        }
        idle.push(stage);
        true
    }

    /// Tears the pool down.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let dropped = std::mem::take(&mut *self.idle.lock()).len();
            debug!(pool = %self.name, dropped, "Pool closed");
        }
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns occupancy figures.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            capacity: self.capacity,
            idle: self.idle.lock().len(),
            created: self.created.load(Ordering::SeqCst),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for AsyncStagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStagePool").field("stats", &self.stats()).finish()
    }
}

//! Bounded-concurrency asynchronous chain.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use super::completion::{completion_slot, CompletionSlot};
use crate::config::duration::serde_millis;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::middleware::{Chain, Handler, Middleware};

/// Concurrency figures for one async chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncStats {
    /// Configured cap on simultaneous executions.
    pub max_concurrency: usize,
    /// Executions currently holding a permit.
    pub active: usize,
    /// Highest `active` value observed.
    pub peak_active: usize,
    /// Submissions not yet completed, including those waiting for a permit.
    pub in_flight: usize,
    /// Per-execution timeout.
    #[serde(with = "serde_millis")]
    pub timeout: Duration,
    /// Whether the chain still accepts submissions.
    pub accepting: bool,
}

struct Shared {
    name: String,
    chain: Chain,
    permits: Semaphore,
    max_concurrency: usize,
    timeout: Duration,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    in_flight: AtomicUsize,
    drained: Notify,
    shut_down: AtomicBool,
}

impl Shared {
    /// Waits for a permit, then races the pipeline against the timeout and
    /// the caller's context.
    async fn execute(&self, ctx: CallContext, req: Request) -> Result<Response, LayerflowError> {
        let _permit = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            permit = self.permits.acquire() => permit.map_err(|_| LayerflowError::ShutDown)?,
        };
        let _active = ActiveGuard::enter(self);
        let request_id = req.id.clone();

        tokio::select! {
            biased;
            err = ctx.done() => {
                debug!(chain = %self.name, request_id = %request_id, "Async execution cancelled");
                Err(err.into())
            }
            () = tokio::time::sleep(self.timeout) => {
                warn!(
                    chain = %self.name,
                    request_id = %request_id,
                    timeout_ms = self.timeout.as_millis(),
                    "Async execution timed out"
                );
                Err(LayerflowError::Timeout)
            }
            result = self.chain.process(&ctx, req) => result,
        }
    }
}

struct ActiveGuard<'a>(&'a Shared);

impl<'a> ActiveGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_active.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

/// A chain whose executions run on their own tasks.
///
/// At most `max_concurrency` executions hold a permit at any time; the rest
/// wait. Every execution is bounded by `timeout`: when it fires, the slot
/// receives [`LayerflowError::Timeout`] and the pipeline future is dropped,
/// so a late result can never reach the caller.
pub struct AsyncChain {
    shared: Arc<Shared>,
}

impl AsyncChain {
    /// Creates a chain ending at `handler`.
    pub fn new(
        name: impl Into<String>,
        handler: Handler,
        max_concurrency: usize,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if max_concurrency == 0 {
            return Err(ConfigError::invalid(
                format!("{name}.max_concurrency"),
                "must be at least 1",
            ));
        }
        if timeout.is_zero() {
            return Err(ConfigError::invalid(format!("{name}.timeout"), "must be greater than zero"));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                name,
                chain: Chain::with_handler(handler),
                permits: Semaphore::new(max_concurrency),
                max_concurrency,
                timeout,
                active: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// The chain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Adds a stage at its priority position.
    pub fn add(&self, stage: Arc<dyn Middleware>) {
        self.shared.chain.add(stage);
    }

    /// Removes a stage by name.
    pub fn remove(&self, name: &str) -> bool {
        self.shared.chain.remove(name)
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.shared.chain.get(name)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.shared.chain.names()
    }

    /// Returns a snapshot of the stages.
    #[must_use]
    pub fn stages(&self) -> Vec<Arc<dyn Middleware>> {
        self.shared.chain.stages()
    }

    /// Returns the number of enabled stages.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.chain.active_count()
    }

    /// Submits a request and returns its completion slot.
    ///
    /// Fails with [`LayerflowError::ShutDown`] once shutdown has begun.
    pub fn process_async(&self, ctx: &CallContext, req: Request) -> Result<CompletionSlot, LayerflowError> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(LayerflowError::ShutDown);
        }
        let (tx, slot) = completion_slot(req.id.clone());
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.shared));
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let outcome = guard.0.execute(ctx, req).await;
            // The slot is fresh, so the first completion always succeeds.
            let _ = tx.complete(outcome);
            drop(guard);
        });
        Ok(slot)
    }

    /// Submits a request and waits for its outcome.
    pub async fn process(&self, ctx: &CallContext, req: Request) -> Result<Response, LayerflowError> {
        let mut slot = self.process_async(ctx, req)?;
        slot.wait().await
    }

    /// Returns the current concurrency figures.
    #[must_use]
    pub fn stats(&self) -> AsyncStats {
        AsyncStats {
            max_concurrency: self.shared.max_concurrency,
            active: self.shared.active.load(Ordering::SeqCst),
            peak_active: self.shared.peak_active.load(Ordering::SeqCst),
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
            timeout: self.shared.timeout,
            accepting: !self.shared.shut_down.load(Ordering::SeqCst),
        }
    }

    /// Returns true once shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Stops accepting submissions and waits for in-flight work to finish.
    ///
    /// Gives up with the context's error when it is cancelled or its
    /// deadline passes first; the remaining executions keep running to
    /// their own timeout.
    pub async fn shutdown(&self, ctx: &CallContext) -> Result<(), LayerflowError> {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        info!(chain = %self.shared.name, in_flight = self.shared.in_flight.load(Ordering::SeqCst), "Shutting down async chain");

        loop {
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                info!(chain = %self.shared.name, "Async chain drained");
                return Ok(());
            }

            tokio::select! {
                err = ctx.done() => {
                    warn!(
                        chain = %self.shared.name,
                        in_flight = self.shared.in_flight.load(Ordering::SeqCst),
                        error = %err,
                        "Async chain shutdown interrupted"
                    );
                    return Err(err.into());
                }
                () = &mut drained => {}
            }
        }
    }
}

impl std::fmt::Debug for AsyncChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncChain")
            .field("name", &self.shared.name)
            .field("stages", &self.shared.chain.names())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::testing::{ok_handler, slow_handler, RecordingMiddleware};
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    fn chain(handler: Handler, max: usize, timeout_ms: u64) -> Arc<AsyncChain> {
        Arc::new(AsyncChain::new("bg", handler, max, Duration::from_millis(timeout_ms)).unwrap())
    }

    #[test]
    fn test_rejects_zero_settings() {
        assert!(AsyncChain::new("a", ok_handler(), 0, Duration::from_secs(1)).is_err());
        assert!(AsyncChain::new("a", ok_handler(), 1, Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_runs_stages_then_handler() {
        let log = RecordingMiddleware::shared_log();
        let chain = chain(ok_handler(), 4, 1_000);
        chain.add(Arc::new(RecordingMiddleware::new("outer", 10, log.clone())));
        chain.add(Arc::new(RecordingMiddleware::new("inner", 1, log.clone())));

        let resp = chain.process(&CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_concurrency_is_capped() {
        let chain = chain(slow_handler(Duration::from_millis(100)), 2, 5_000);
        let ctx = CallContext::background();

        let mut slots: Vec<_> = (0..5)
            .map(|_| chain.process_async(&ctx, Request::get("/")).unwrap())
            .collect();

        let start = Instant::now();
        for slot in &mut slots {
            assert_eq!(slot.wait().await.unwrap().status_code, 200);
        }
        let stats = chain.stats();
        assert_eq!(stats.peak_active, 2);
        assert_eq!(stats.active, 0);
        // Five 100ms executions two at a time take three rounds.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_delivers_one_outcome() {
        let chain = chain(slow_handler(Duration::from_secs(2)), 1, 100);
        let mut slot = chain
            .process_async(&CallContext::background(), Request::get("/"))
            .unwrap();

        assert_eq!(slot.wait().await.unwrap_err(), LayerflowError::Timeout);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(slot.try_take().is_none());
        assert_eq!(chain.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_wins() {
        let chain = chain(slow_handler(Duration::from_secs(2)), 1, 10_000);
        let ctx = CallContext::background().with_cancel();
        let mut slot = chain.process_async(&ctx, Request::get("/")).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel("caller gave up");
        let err = slot.wait().await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_stage_error_is_delivered() {
        let handler = handler_fn(|_ctx, _req| async { Err(LayerflowError::stage("boom")) });
        let chain = chain(handler, 1, 1_000);
        let err = chain.process(&CallContext::background(), Request::get("/")).await.unwrap_err();
        assert_eq!(err, LayerflowError::stage("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_rejects() {
        let chain = chain(slow_handler(Duration::from_millis(200)), 2, 5_000);
        let ctx = CallContext::background();
        let mut slot = chain.process_async(&ctx, Request::get("/")).unwrap();

        let deadline = CallContext::background().with_timeout(Duration::from_secs(1));
        chain.shutdown(&deadline).await.unwrap();
        assert!(slot.try_take().is_some());
        assert!(!chain.stats().accepting);
        assert_eq!(
            chain.process_async(&ctx, Request::get("/")).unwrap_err(),
            LayerflowError::ShutDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_at_deadline() {
        let chain = chain(slow_handler(Duration::from_secs(5)), 1, 10_000);
        let _slot = chain
            .process_async(&CallContext::background(), Request::get("/"))
            .unwrap();

        let deadline = CallContext::background().with_timeout(Duration::from_millis(100));
        let err = chain.shutdown(&deadline).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}

//! Handler fixtures for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::Response;
use crate::errors::LayerflowError;
use crate::middleware::{handler_fn, Handler};

/// A clonable call counter shared between a handler and a test.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count.
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Adds one and returns the new count.
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A handler answering 200.
#[must_use]
pub fn ok_handler() -> Handler {
    handler_fn(|_ctx, req| async move { Ok(Response::ok(&req)) })
}

/// A handler answering 200 after `delay`.
#[must_use]
pub fn slow_handler(delay: Duration) -> Handler {
    handler_fn(move |_ctx, req| async move {
        tokio::time::sleep(delay).await;
        Ok(Response::ok(&req))
    })
}

/// A handler answering 200 and counting calls.
#[must_use]
pub fn counting_handler(counter: CallCounter) -> Handler {
    handler_fn(move |_ctx, req| {
        counter.increment();
        async move { Ok(Response::ok(&req)) }
    })
}

/// A handler that always fails with `message`, counting calls.
#[must_use]
pub fn failing_handler(message: impl Into<String>, counter: CallCounter) -> Handler {
    let message = message.into();
    handler_fn(move |_ctx, _req| {
        counter.increment();
        let err = LayerflowError::stage(message.clone());
        async move { Err(err) }
    })
}

/// A handler that fails with `message` on its first `failures` calls, then
/// answers 200.
#[must_use]
pub fn flaky_handler(failures: usize, message: impl Into<String>, counter: CallCounter) -> Handler {
    let message = message.into();
    handler_fn(move |_ctx, req| {
        let call = counter.increment();
        let outcome = if call <= failures {
            Err(LayerflowError::stage(message.clone()))
        } else {
            Ok(Response::ok(&req))
        };
        async move { outcome }
    })
}

//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Tokens can be awaited with [`cancelled`](Self::cancelled) and form a tree
/// through [`child`](Self::child): cancelling a parent cancels every child,
/// never the other way around.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation, drained on first cancel.
    callbacks: Mutex<Vec<CancelCallback>>,
    /// Children to cancel with this token. Dead entries are pruned on insert.
    children: Mutex<Vec<Weak<CancellationToken>>>,
    /// Wakes async waiters.
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child token that is cancelled together with this one.
    ///
    /// The parent holds only a weak link, so dropped children cost nothing.
    #[must_use]
    pub fn child(&self) -> Arc<Self> {
        let child = Arc::new(Self::new());
        {
            let mut children = self.children.lock();
            if !self.is_cancelled() {
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&child));
                return child;
            }
        }
        child.cancel(self.parent_reason());
        child
    }

    fn parent_reason(&self) -> String {
        self.reason().unwrap_or_else(|| "parent cancelled".to_string())
    }

    /// Requests cancellation with a reason.
    ///
    /// Only the first reason is kept. Callbacks run once, outside any lock;
    /// a panicking callback is logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            // The reason is in place before the flag becomes visible.
            let mut slot = self.reason.write();
            if self.is_cancelled() {
                return;
            }
            *slot = Some(reason.into());
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        if !children.is_empty() {
            let reason = self.parent_reason();
            for child in children.iter().filter_map(Weak::upgrade) {
                child.cancel(reason.clone());
            }
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            run_callback(callback);
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.callbacks.lock();
            if !self.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        run_callback(Box::new(callback));
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Waits until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!(
            panic = %crate::utils::panic_message(e.as_ref()),
            "Cancellation callback panicked"
        );
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

//! The call context handed to every stage.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cancellation::CancellationToken;
use crate::errors::ContextError;

/// Cancellation and deadline scope for one call.
///
/// Cloning is cheap and clones share the same token: cancelling any clone
/// cancels them all. Derived contexts (`with_cancel`, `with_timeout`,
/// `with_deadline`) get a child token, so they observe the parent's
/// cancellation without being able to cancel it. Deadlines only tighten.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: Arc<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Returns a root context that is never cancelled on its own.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: Arc::new(CancellationToken::new()),
            deadline: None,
        }
    }

    /// Derives a context that can be cancelled independently of this one.
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child(),
            deadline: self.deadline,
        }
    }

    /// Derives a context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context with a deadline, keeping the earlier of the two.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and everything derived from it.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns why the context finished, or `None` while it is still live.
    ///
    /// Explicit cancellation takes precedence over an elapsed deadline.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            let reason = self.token.reason().unwrap_or_default();
            return Some(ContextError::Cancelled(reason));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true once the context is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Waits until the context finishes and returns why.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => self.cancelled_error(),
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                self.cancelled_error()
            }
        }
    }

    fn cancelled_error(&self) -> ContextError {
        ContextError::Cancelled(self.token.reason().unwrap_or_default())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_background_is_live() {
        let ctx = CallContext::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_reaches_clones_and_children() {
        let ctx = CallContext::background();
        let clone = ctx.clone();
        let child = ctx.with_cancel();

        clone.cancel("stop");

        assert_eq!(ctx.err(), Some(ContextError::Cancelled("stop".to_string())));
        assert_eq!(child.err(), Some(ContextError::Cancelled("stop".to_string())));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CallContext::background();
        let child = parent.with_cancel();
        child.cancel("child");
        assert!(parent.err().is_none());
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn test_deadline_only_tightens() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let looser = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(looser.deadline(), ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_reports_deadline() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(100));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_reports_cancellation() {
        let ctx = CallContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel("client went away");
        });
        assert_eq!(
            ctx.done().await,
            ContextError::Cancelled("client went away".to_string())
        );
    }
}

//! Single-assignment completion slots for asynchronous outcomes.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::core::Response;
use crate::errors::LayerflowError;

type Outcome = Result<Response, LayerflowError>;

/// Creates a connected sender and slot.
#[must_use]
pub fn completion_slot(request_id: impl Into<String>) -> (CompletionSender, CompletionSlot) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender {
            tx: Mutex::new(Some(tx)),
        },
        CompletionSlot {
            request_id: request_id.into(),
            rx,
            taken: false,
        },
    )
}

/// The producing half of a completion slot.
///
/// The first call to [`complete`](Self::complete) delivers the outcome;
/// later calls fail with [`LayerflowError::AlreadyCompleted`].
#[derive(Debug)]
pub struct CompletionSender {
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl CompletionSender {
    /// Delivers the outcome.
    ///
    /// A receiver that was already dropped is not an error: the outcome is
    /// discarded and the slot still counts as completed.
    pub fn complete(&self, outcome: Outcome) -> Result<(), LayerflowError> {
        let tx = self.tx.lock().take().ok_or(LayerflowError::AlreadyCompleted)?;
        let _ = tx.send(outcome);
        Ok(())
    }

    /// Returns true once an outcome has been delivered.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// The consuming half: resolves to exactly one outcome.
#[derive(Debug)]
pub struct CompletionSlot {
    request_id: String,
    rx: oneshot::Receiver<Outcome>,
    taken: bool,
}

impl CompletionSlot {
    /// The id of the request this slot belongs to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Waits for the outcome.
    ///
    /// A sender dropped without completing (its task was torn down with the
    /// runtime) resolves to [`LayerflowError::ShutDown`]. Waiting again after
    /// the outcome was taken yields [`LayerflowError::AlreadyCompleted`].
    pub async fn wait(&mut self) -> Outcome {
        if self.taken {
            return Err(LayerflowError::AlreadyCompleted);
        }
        let outcome = (&mut self.rx).await;
        self.taken = true;
        outcome.unwrap_or(Err(LayerflowError::ShutDown))
    }

    /// Takes the outcome if it is already available.
    pub fn try_take(&mut self) -> Option<Outcome> {
        if self.taken {
            return None;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.taken = true;
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.taken = true;
                Some(Err(LayerflowError::ShutDown))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Request;

    #[tokio::test]
    async fn test_delivers_once() {
        let (tx, mut slot) = completion_slot("r1");
        let req = Request::get("/");
        tx.complete(Ok(Response::ok(&req))).unwrap();
        assert!(tx.is_completed());
        assert_eq!(
            tx.complete(Err(LayerflowError::Timeout)),
            Err(LayerflowError::AlreadyCompleted)
        );

        let resp = slot.wait().await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(slot.wait().await.unwrap_err(), LayerflowError::AlreadyCompleted);
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_shutdown() {
        let (tx, mut slot) = completion_slot("r2");
        drop(tx);
        assert_eq!(slot.wait().await.unwrap_err(), LayerflowError::ShutDown);
    }

    #[test]
    fn test_try_take() {
        let (tx, mut slot) = completion_slot("r3");
        assert!(slot.try_take().is_none());
        tx.complete(Err(LayerflowError::Timeout)).unwrap();
        assert_eq!(slot.try_take(), Some(Err(LayerflowError::Timeout)));
        assert!(slot.try_take().is_none());
        assert_eq!(slot.request_id(), "r3");
    }

    #[test]
    fn test_complete_after_receiver_dropped() {
        let (tx, slot) = completion_slot("r4");
        drop(slot);
        assert!(tx.complete(Err(LayerflowError::Timeout)).is_ok());
    }
}

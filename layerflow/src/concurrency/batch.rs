//! Batch submission over an async chain.

use std::sync::Arc;
use tracing::{debug, warn};

use super::chain::AsyncChain;
use super::completion::CompletionSlot;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::LayerflowError;

/// The outcome for one request of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    /// Position of the request in the submitted batch.
    pub index: usize,
    /// The request id.
    pub request_id: String,
    /// What the pipeline produced.
    pub outcome: Result<Response, LayerflowError>,
}

/// All records of a batch, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// One record per submitted request.
    pub records: Vec<ExecutionRecord>,
    /// Set when the batch was interrupted by its context.
    pub error: Option<LayerflowError>,
}

impl BatchResult {
    /// Number of records that carry a response.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_ok()).count()
    }

    /// Number of records that carry an error.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.records.len() - self.success_count()
    }

    /// Converts into a plain result, failing when the batch was interrupted.
    pub fn into_result(self) -> Result<Vec<ExecutionRecord>, LayerflowError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

/// Submits requests to an [`AsyncChain`] in groups of at most `batch_size`.
///
/// A group is fully collected before the next one is submitted. Within a
/// group the requests run concurrently, subject to the chain's own cap.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    chain: Arc<AsyncChain>,
    batch_size: usize,
}

impl BatchProcessor {
    /// Creates a processor; a zero batch size is treated as one.
    #[must_use]
    pub fn new(chain: Arc<AsyncChain>, batch_size: usize) -> Self {
        Self {
            chain,
            batch_size: batch_size.max(1),
        }
    }

    /// The group size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The chain requests are submitted to.
    #[must_use]
    pub const fn chain(&self) -> &Arc<AsyncChain> {
        &self.chain
    }

    /// Processes every request, returning one record per request.
    ///
    /// When the context finishes early, records that already completed keep
    /// their real outcome, the others carry the context error, and the
    /// same error is set on the result.
    pub async fn process(&self, ctx: &CallContext, requests: Vec<Request>) -> BatchResult {
        let total = requests.len();
        let mut records = Vec::with_capacity(total);
        let mut interrupted: Option<LayerflowError> = None;
        let mut pending = requests.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            let group: Vec<(usize, Request)> = pending.by_ref().take(self.batch_size).collect();

            if let Some(err) = interrupted.clone().or_else(|| ctx.err().map(Into::into)) {
                interrupted.get_or_insert_with(|| err.clone());
                records.extend(group.into_iter().map(|(index, req)| ExecutionRecord {
                    index,
                    request_id: req.id,
                    outcome: Err(err.clone()),
                }));
                continue;
            }

            debug!(chain = self.chain.name(), size = group.len(), "Submitting batch group");
            let mut submitted: Vec<(usize, String, Result<CompletionSlot, LayerflowError>)> = group
                .into_iter()
                .map(|(index, req)| {
                    let id = req.id.clone();
                    (index, id, self.chain.process_async(ctx, req))
                })
                .collect();

            for (index, request_id, slot) in &mut submitted {
                let outcome = match slot {
                    Err(err) => Err(err.clone()),
                    Ok(slot) => match interrupted.clone() {
                        Some(err) => slot.try_take().unwrap_or(Err(err)),
                        None => {
                            tokio::select! {
                                biased;
                                outcome = slot.wait() => outcome,
                                err = ctx.done() => {
                                    let err = LayerflowError::from(err);
                                    interrupted = Some(err.clone());
                                    slot.try_take().unwrap_or(Err(err))
                                }
                            }
                        }
                    },
                };
                records.push(ExecutionRecord {
                    index: *index,
                    request_id: std::mem::take(request_id),
                    outcome,
                });
            }
        }

        if let Some(err) = &interrupted {
            warn!(
                chain = self.chain.name(),
                total,
                completed = records.iter().filter(|r| r.outcome.is_ok()).count(),
                error = %err,
                "Batch interrupted"
            );
        }
        BatchResult {
            records,
            error: interrupted,
        }
    }
}

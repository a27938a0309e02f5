//! Batch orchestrator.
//!
//! Drives a list of documents through the [`TransitionProcessor`] one at a
//! time. Every item runs in its own unit of work and every failure is folded
//! into an [`Outcome`] for that item, so one bad document never aborts or
//! rolls back the rest of the batch.

use std::collections::BTreeMap;
use std::time::Duration;

use docflow_storage::{DocumentId, DocumentStorage};

use crate::error::Outcome;
use crate::transition::{Transition, TransitionProcessor};

/// Per-document result of a batch call.
pub type BatchOutcomes = BTreeMap<DocumentId, Outcome>;

/// Default upper bound on a single transition inside a batch.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BatchProcessor<S: DocumentStorage> {
    processor: TransitionProcessor<S>,
    item_timeout: Duration,
}

impl<S: DocumentStorage> Clone for BatchProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            item_timeout: self.item_timeout,
        }
    }
}

impl<S: DocumentStorage> BatchProcessor<S> {
    pub fn new(processor: TransitionProcessor<S>) -> Self {
        Self::with_item_timeout(processor, DEFAULT_ITEM_TIMEOUT)
    }

    pub fn with_item_timeout(processor: TransitionProcessor<S>, item_timeout: Duration) -> Self {
        Self {
            processor,
            item_timeout,
        }
    }

    pub fn processor(&self) -> &TransitionProcessor<S> {
        &self.processor
    }

    pub async fn submit_batch(&self, ids: &[DocumentId], initiator: &str) -> BatchOutcomes {
        self.run(Transition::Submit, ids, initiator).await
    }

    pub async fn approve_batch(&self, ids: &[DocumentId], initiator: &str) -> BatchOutcomes {
        self.run(Transition::Approve, ids, initiator).await
    }

    /// Apply `transition` to each id in request order. An id that appears
    /// more than once is processed on its first occurrence only.
    pub async fn run(
        &self,
        transition: Transition,
        ids: &[DocumentId],
        initiator: &str,
    ) -> BatchOutcomes {
        let mut outcomes = BatchOutcomes::new();
        for &id in ids {
            if outcomes.contains_key(&id) {
                continue;
            }
            let outcome = self.run_one(transition, id, initiator).await;
            outcomes.insert(id, outcome);
        }
        outcomes
    }

    async fn run_one(&self, transition: Transition, id: DocumentId, initiator: &str) -> Outcome {
        let call = self.processor.apply(transition, id, initiator);
        match tokio::time::timeout(self.item_timeout, call).await {
            Ok(Ok(_)) => Outcome::Success,
            Ok(Err(err)) => Outcome::from(&err),
            Err(_) => {
                // Dropping the call drops its snapshot uncommitted.
                tracing::error!(
                    document_id = %id,
                    action = %transition.action(),
                    timeout_ms = self.item_timeout.as_millis() as u64,
                    "transition timed out"
                );
                Outcome::Error
            }
        }
    }
}

/// Number of `SUCCESS` outcomes in a batch result.
pub fn success_count(outcomes: &BatchOutcomes) -> usize {
    outcomes.values().filter(|o| o.is_success()).count()
}

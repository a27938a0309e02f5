//! Concurrency harness.
//!
//! Fires many approve attempts at one document at the same instant to
//! exercise the optimistic-locking contract end to end. Attempts go through
//! the public [`TransitionProcessor::approve`], each in its own unit of work,
//! exactly as any other caller would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docflow_storage::{DocumentId, DocumentStorage, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::Barrier;
use tokio::task::JoinSet;

use crate::error::HarnessError;
use crate::transition::TransitionProcessor;

/// Initiator recorded for approvals made by the harness.
pub const HARNESS_INITIATOR: &str = "CONCURRENCY_TESTER";

/// Final status reported when the document does not exist.
pub const MISSING_STATUS: &str = "NOT_FOUND";

/// Largest accepted worker count for one run.
pub const MAX_WORKERS: usize = 256;

/// Largest accepted attempt count for one run.
pub const MAX_ATTEMPTS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyReport {
    pub success_count: usize,
    pub conflict_count: usize,
    pub error_count: usize,
    pub final_status: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    success: usize,
    conflict: usize,
    error: usize,
}

pub struct ConcurrencyHarness<S: DocumentStorage> {
    processor: TransitionProcessor<S>,
}

impl<S: DocumentStorage> ConcurrencyHarness<S> {
    pub fn new(processor: TransitionProcessor<S>) -> Self {
        Self { processor }
    }

    /// Run `attempt_count` approvals of `document_id` on a pool of
    /// `worker_count` tasks.
    ///
    /// Every worker waits on a shared barrier before its first attempt, so
    /// all of them hit the store together. Workers then claim attempts from
    /// a shared counter until none are left. The call returns only after
    /// every attempt has finished.
    ///
    /// The pool never has more tasks than attempts. Counts above
    /// [`MAX_WORKERS`] or [`MAX_ATTEMPTS`] are rejected.
    pub async fn test_concurrency(
        &self,
        document_id: DocumentId,
        worker_count: usize,
        attempt_count: usize,
    ) -> Result<ConcurrencyReport, HarnessError> {
        if worker_count == 0 {
            return Err(HarnessError::NoWorkers);
        }
        if worker_count > MAX_WORKERS {
            return Err(HarnessError::LimitExceeded {
                field: "worker count",
                value: worker_count,
                limit: MAX_WORKERS,
            });
        }
        if attempt_count > MAX_ATTEMPTS {
            return Err(HarnessError::LimitExceeded {
                field: "attempt count",
                value: attempt_count,
                limit: MAX_ATTEMPTS,
            });
        }
        let pool_size = worker_count.min(attempt_count);

        tracing::info!(
            document_id = %document_id,
            worker_count,
            pool_size,
            attempt_count,
            "starting concurrency test"
        );

        // One extra party: the coordinator opens the gate once every worker
        // is parked on it.
        let parties = pool_size
            .checked_add(1)
            .ok_or(HarnessError::LimitExceeded {
                field: "worker count",
                value: worker_count,
                limit: MAX_WORKERS,
            })?;
        let start = Arc::new(Barrier::new(parties));
        let next_attempt = Arc::new(AtomicUsize::new(0));
        let mut pool = JoinSet::new();

        for _ in 0..pool_size {
            let processor = self.processor.clone();
            let start = Arc::clone(&start);
            let next_attempt = Arc::clone(&next_attempt);
            pool.spawn(async move {
                start.wait().await;
                let mut tally = Tally::default();
                while next_attempt.fetch_add(1, Ordering::SeqCst) < attempt_count {
                    match processor.approve(document_id, HARNESS_INITIATOR).await {
                        Ok(_) => tally.success += 1,
                        Err(e) if e.is_conflict() => tally.conflict += 1,
                        Err(e) => {
                            tracing::error!(
                                document_id = %document_id,
                                error = %e,
                                "unexpected error in concurrency test"
                            );
                            tally.error += 1;
                        }
                    }
                }
                tally
            });
        }

        start.wait().await;

        let mut total = Tally::default();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(tally) => {
                    total.success += tally.success;
                    total.conflict += tally.conflict;
                    total.error += tally.error;
                }
                Err(e) => {
                    tracing::error!(
                        document_id = %document_id,
                        error = %e,
                        "concurrency test worker failed"
                    );
                    total.error += 1;
                }
            }
        }

        let final_status = match self.processor.storage().get_document(document_id).await {
            Ok(doc) => doc.status.as_str().to_string(),
            Err(StorageError::DocumentNotFound { .. }) => MISSING_STATUS.to_string(),
            Err(e) => return Err(HarnessError::Storage(e)),
        };

        let report = ConcurrencyReport {
            success_count: total.success,
            conflict_count: total.conflict,
            error_count: total.error,
            final_status,
        };
        tracing::info!(
            document_id = %document_id,
            success = report.success_count,
            conflict = report.conflict_count,
            error = report.error_count,
            final_status = %report.final_status,
            "concurrency test finished"
        );
        Ok(report)
    }
}

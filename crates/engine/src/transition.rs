//! Transition processor.
//!
//! Each call to [`TransitionProcessor::submit`] or
//! [`TransitionProcessor::approve`] is one unit of work: it opens its own
//! storage snapshot, reads the document, checks the status precondition,
//! performs the version-guarded status write, appends the history entry and
//! (for approval) the registry entry, then commits. Any failure aborts the
//! snapshot, so the store never sees a partial transition and nothing the
//! caller committed elsewhere is rolled back with it.

use std::sync::Arc;

use docflow_storage::{
    DocumentAction, DocumentId, DocumentStatus, DocumentStorage, HistoryRecord, RegistryRecord,
};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::TransitionError;

/// One step of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// DRAFT -> SUBMITTED
    Submit,
    /// SUBMITTED -> APPROVED, plus a registry entry
    Approve,
}

impl Transition {
    pub fn from_status(self) -> DocumentStatus {
        match self {
            Transition::Submit => DocumentStatus::Draft,
            Transition::Approve => DocumentStatus::Submitted,
        }
    }

    pub fn to_status(self) -> DocumentStatus {
        match self {
            Transition::Submit => DocumentStatus::Submitted,
            Transition::Approve => DocumentStatus::Approved,
        }
    }

    pub fn action(self) -> DocumentAction {
        match self {
            Transition::Submit => DocumentAction::Submit,
            Transition::Approve => DocumentAction::Approve,
        }
    }

    /// Audit comment written with the history entry.
    pub fn comment(self) -> &'static str {
        match self {
            Transition::Submit => "Sent for approval",
            Transition::Approve => "Document approved",
        }
    }

    fn registers(self) -> bool {
        matches!(self, Transition::Approve)
    }
}

/// What a successful transition changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReceipt {
    pub document_id: DocumentId,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub version: i64,
}

/// Applies single transitions against a shared store.
pub struct TransitionProcessor<S: DocumentStorage> {
    storage: Arc<S>,
}

impl<S: DocumentStorage> Clone for TransitionProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: DocumentStorage> TransitionProcessor<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub async fn submit(
        &self,
        document_id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, TransitionError> {
        self.apply(Transition::Submit, document_id, initiator).await
    }

    pub async fn approve(
        &self,
        document_id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, TransitionError> {
        self.apply(Transition::Approve, document_id, initiator).await
    }

    /// Run `transition` on one document in a fresh snapshot.
    pub async fn apply(
        &self,
        transition: Transition,
        document_id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, TransitionError> {
        let result = self.run(transition, document_id, initiator).await;
        match &result {
            Ok(receipt) => tracing::debug!(
                document_id = %document_id,
                initiator,
                to = %receipt.to,
                version = receipt.version,
                "transition committed"
            ),
            Err(err @ TransitionError::Unexpected { .. }) => tracing::error!(
                document_id = %document_id,
                initiator,
                action = %transition.action(),
                error = %err,
                "transition failed unexpectedly"
            ),
            Err(err) => tracing::debug!(
                document_id = %document_id,
                initiator,
                action = %transition.action(),
                error = %err,
                "transition rejected"
            ),
        }
        result
    }

    async fn run(
        &self,
        transition: Transition,
        document_id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, TransitionError> {
        let storage_err = |e| TransitionError::from_storage(document_id, e);

        let mut snapshot = self.storage.begin_snapshot().await.map_err(storage_err)?;

        let receipt = match self
            .stage(&mut snapshot, transition, document_id, initiator)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                return Err(e);
            }
        };

        // The version check is repeated at commit; a writer that got there
        // first surfaces here as VersionConflict.
        self.storage
            .commit_snapshot(snapshot)
            .await
            .map_err(storage_err)?;

        Ok(receipt)
    }

    async fn stage(
        &self,
        snapshot: &mut S::Snapshot,
        transition: Transition,
        document_id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, TransitionError> {
        let storage_err = |e| TransitionError::from_storage(document_id, e);

        let current = self
            .storage
            .get_document_in_snapshot(snapshot, document_id)
            .await
            .map_err(storage_err)?;

        if current.status != transition.from_status() {
            return Err(TransitionError::InvalidTransition {
                document_id,
                current: current.status,
                action: transition.action(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let version = self
            .storage
            .update_document_status(
                snapshot,
                document_id,
                current.version,
                transition.to_status(),
                now,
            )
            .await
            .map_err(storage_err)?;

        self.storage
            .insert_history_entry(
                snapshot,
                HistoryRecord {
                    id: Uuid::new_v4(),
                    document_id,
                    initiator: initiator.to_string(),
                    action: transition.action(),
                    created_at: now,
                    comment: transition.comment().to_string(),
                },
            )
            .await
            .map_err(storage_err)?;

        if transition.registers() {
            self.storage
                .insert_registry_entry(
                    snapshot,
                    RegistryRecord {
                        id: Uuid::new_v4(),
                        document_id,
                        registered_at: now,
                    },
                )
                .await
                .map_err(storage_err)?;
        }

        Ok(TransitionReceipt {
            document_id,
            from: current.status,
            to: transition.to_status(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchProcessor;
    use crate::error::{ErrorKind, Outcome};
    use crate::harness::ConcurrencyHarness;
    use crate::testing::{preregister, seed_document};
    use docflow_storage::InMemoryStorage;

    fn processor() -> TransitionProcessor<InMemoryStorage> {
        TransitionProcessor::new(Arc::new(InMemoryStorage::new()))
    }

    #[test]
    fn transitions_only_move_to_the_adjacent_status() {
        for t in [Transition::Submit, Transition::Approve] {
            assert_eq!(t.from_status().next(), Some(t.to_status()));
        }
    }

    #[tokio::test]
    async fn submit_then_approve_writes_history_and_registry() {
        let p = processor();
        let id = seed_document(p.storage(), "A", "T").await;

        let submitted = p.submit(id, "u1").await.unwrap();
        assert_eq!(submitted.to, DocumentStatus::Submitted);
        assert_eq!(submitted.version, 1);

        let approved = p.approve(id, "u2").await.unwrap();
        assert_eq!(approved.from, DocumentStatus::Submitted);
        assert_eq!(approved.version, 2);

        let history = p.storage().list_history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].initiator, "u1");
        assert_eq!(history[0].comment, "Sent for approval");
        assert_eq!(history[1].action, DocumentAction::Approve);
        assert_eq!(history[1].comment, "Document approved");
        assert_eq!(p.storage().count_registry_entries(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let p = processor();
        let err = p.submit(DocumentId::new(), "u1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn approving_a_draft_is_rejected_without_side_effects() {
        let p = processor();
        let id = seed_document(p.storage(), "A", "T").await;

        let err = p.approve(id, "u1").await.unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                document_id: id,
                current: DocumentStatus::Draft,
                action: DocumentAction::Approve,
            }
        );

        let doc = p.storage().get_document(id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Draft);
        assert_eq!(doc.version, 0);
        assert!(p.storage().list_history(id).await.unwrap().is_empty());
        assert_eq!(p.storage().count_registry_entries(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resubmitting_is_a_conflict() {
        let p = processor();
        let id = seed_document(p.storage(), "A", "T").await;
        p.submit(id, "u1").await.unwrap();

        let err = p.submit(id, "u1").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(p.storage().list_history(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn approving_a_registered_document_persists_nothing() {
        let p = processor();
        let storage = Arc::clone(p.storage());
        let id = seed_document(&storage, "A", "T").await;
        p.submit(id, "u1").await.unwrap();
        preregister(&storage, id).await;
        let before = storage.get_document(id).await.unwrap();

        let assert_untouched = |doc: docflow_storage::DocumentRecord| {
            assert_eq!(doc.status, DocumentStatus::Submitted);
            assert_eq!(doc.version, before.version);
            assert_eq!(doc.updated_at, before.updated_at);
        };

        let err = p.approve(id, "u2").await.unwrap_err();
        assert_eq!(err, TransitionError::RegistryViolation { document_id: id });
        assert_untouched(storage.get_document(id).await.unwrap());

        let outcomes = BatchProcessor::new(p.clone()).approve_batch(&[id], "u3").await;
        assert_eq!(outcomes[&id], Outcome::RegistryError);
        assert_untouched(storage.get_document(id).await.unwrap());

        let report = ConcurrencyHarness::new(p.clone())
            .test_concurrency(id, 2, 4)
            .await
            .unwrap();
        assert_eq!(report.success_count, 0);
        assert_eq!(report.conflict_count, 4);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.final_status, "SUBMITTED");
        assert_untouched(storage.get_document(id).await.unwrap());

        let history = storage.list_history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, DocumentAction::Submit);
        assert_eq!(storage.count_registry_entries(id).await.unwrap(), 1);
    }
}

//! Document service facade.
//!
//! The operations exposed to outer layers (HTTP, CLI): document creation,
//! reads, single and batched transitions, and the concurrency harness.
//! Input validation happens here; workflow rules live in the processor.

use std::sync::Arc;

use docflow_storage::{
    DocumentId, DocumentRecord, DocumentStatus, DocumentStorage, HistoryRecord, StorageError,
};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::batch::{BatchOutcomes, BatchProcessor};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::harness::{ConcurrencyHarness, ConcurrencyReport};
use crate::scheduler::Scheduler;
use crate::transition::{TransitionProcessor, TransitionReceipt};

/// Attempts at drawing a fresh unique number before giving up.
const UNIQUE_NUMBER_ATTEMPTS: usize = 3;

/// A document together with its ordered audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWithHistory {
    #[serde(flatten)]
    pub document: DocumentRecord,
    pub history: Vec<HistoryRecord>,
}

pub struct DocumentService<S: DocumentStorage> {
    storage: Arc<S>,
    batch: BatchProcessor<S>,
    harness: ConcurrencyHarness<S>,
}

impl<S: DocumentStorage> DocumentService<S> {
    pub fn new(storage: Arc<S>, config: &EngineConfig) -> Self {
        let processor = TransitionProcessor::new(Arc::clone(&storage));
        Self {
            batch: BatchProcessor::with_item_timeout(
                processor.clone(),
                config.transition_timeout(),
            ),
            harness: ConcurrencyHarness::new(processor),
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    fn processor(&self) -> &TransitionProcessor<S> {
        self.batch.processor()
    }

    /// Background scheduler sharing this service's processor.
    pub fn scheduler(&self, config: &EngineConfig) -> Scheduler<S> {
        Scheduler::new(self.batch.clone(), config.workers.clone())
    }

    /// Create a DRAFT document at version 0 with a generated unique number.
    pub async fn create(&self, author: &str, title: &str) -> Result<DocumentRecord, EngineError> {
        let author = require_non_blank("author", author)?;
        let title = require_non_blank("title", title)?;

        let mut last_err = None;
        for _ in 0..UNIQUE_NUMBER_ATTEMPTS {
            let now = OffsetDateTime::now_utc();
            let record = DocumentRecord {
                id: DocumentId::new(),
                unique_number: generate_unique_number(),
                author: author.to_string(),
                title: title.to_string(),
                status: DocumentStatus::Draft,
                version: 0,
                created_at: now,
                updated_at: now,
            };

            let mut snapshot = self.storage.begin_snapshot().await?;
            let staged = self.storage.insert_document(&mut snapshot, record.clone()).await;
            let result = match staged {
                Ok(()) => self.storage.commit_snapshot(snapshot).await,
                Err(e) => {
                    let _ = self.storage.abort_snapshot(snapshot).await;
                    Err(e)
                }
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        document_id = %record.id,
                        unique_number = %record.unique_number,
                        "document created"
                    );
                    return Ok(record);
                }
                Err(e @ StorageError::DuplicateUniqueNumber { .. }) => {
                    tracing::warn!(error = %e, "unique number collision, regenerating");
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(EngineError::from)
            .unwrap_or_else(|| EngineError::Validation("no unique number available".into())))
    }

    pub async fn get_with_history(
        &self,
        id: DocumentId,
    ) -> Result<DocumentWithHistory, EngineError> {
        let document = match self.storage.get_document(id).await {
            Ok(doc) => doc,
            Err(StorageError::DocumentNotFound { .. }) => return Err(EngineError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        let history = self.storage.list_history(id).await?;
        Ok(DocumentWithHistory { document, history })
    }

    /// Fetch several documents; unknown ids are skipped.
    pub async fn get_many(&self, ids: &[DocumentId]) -> Result<Vec<DocumentRecord>, EngineError> {
        Ok(self.storage.get_documents(ids).await?)
    }

    pub async fn submit(
        &self,
        id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, EngineError> {
        let initiator = require_non_blank("initiator", initiator)?;
        Ok(self.processor().submit(id, initiator).await?)
    }

    pub async fn approve(
        &self,
        id: DocumentId,
        initiator: &str,
    ) -> Result<TransitionReceipt, EngineError> {
        let initiator = require_non_blank("initiator", initiator)?;
        Ok(self.processor().approve(id, initiator).await?)
    }

    pub async fn submit_batch(
        &self,
        ids: &[DocumentId],
        initiator: &str,
    ) -> Result<BatchOutcomes, EngineError> {
        let initiator = validate_batch(ids, initiator)?;
        Ok(self.batch.submit_batch(ids, initiator).await)
    }

    pub async fn approve_batch(
        &self,
        ids: &[DocumentId],
        initiator: &str,
    ) -> Result<BatchOutcomes, EngineError> {
        let initiator = validate_batch(ids, initiator)?;
        Ok(self.batch.approve_batch(ids, initiator).await)
    }

    pub async fn test_concurrency(
        &self,
        id: DocumentId,
        worker_count: usize,
        attempt_count: usize,
    ) -> Result<ConcurrencyReport, EngineError> {
        Ok(self
            .harness
            .test_concurrency(id, worker_count, attempt_count)
            .await?)
    }
}

/// `DOC-` followed by eight uppercase hex digits.
fn generate_unique_number() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("DOC-{}", simple[..8].to_ascii_uppercase())
}

fn require_non_blank<'a>(field: &str, value: &'a str) -> Result<&'a str, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{field} must not be blank")));
    }
    Ok(trimmed)
}

fn validate_batch<'a>(ids: &[DocumentId], initiator: &'a str) -> Result<&'a str, EngineError> {
    if ids.is_empty() {
        return Err(EngineError::Validation(
            "documentIds must not be empty".to_string(),
        ));
    }
    require_non_blank("initiator", initiator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_storage::InMemoryStorage;

    fn service() -> DocumentService<InMemoryStorage> {
        DocumentService::new(Arc::new(InMemoryStorage::new()), &EngineConfig::default())
    }

    #[test]
    fn unique_number_format() {
        let number = generate_unique_number();
        assert_eq!(number.len(), 12);
        assert!(number.starts_with("DOC-"));
        assert!(number[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn create_starts_in_draft_at_version_zero() {
        let s = service();
        let doc = s.create("A", "T").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Draft);
        assert_eq!(doc.version, 0);
        assert_eq!(doc.author, "A");

        let stored = s.get_with_history(doc.id).await.unwrap();
        assert_eq!(stored.document, doc);
        assert!(stored.history.is_empty());
    }

    #[tokio::test]
    async fn blank_fields_are_rejected() {
        let s = service();
        assert!(matches!(
            s.create("  ", "T").await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            s.create("A", "").await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            s.submit_batch(&[], "u1").await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            s.approve_batch(&[DocumentId::new()], " ").await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let id = DocumentId::new();
        match service().get_with_history(id).await {
            Err(EngineError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn with_history_serializes_flat() {
        let s = service();
        let doc = s.create("A", "T").await.unwrap();
        s.submit(doc.id, "u1").await.unwrap();

        let value = serde_json::to_value(s.get_with_history(doc.id).await.unwrap()).unwrap();
        assert_eq!(value["status"], "SUBMITTED");
        assert_eq!(value["uniqueNumber"], doc.unique_number.as_str());
        assert_eq!(value["history"][0]["action"], "SUBMIT");
    }
}

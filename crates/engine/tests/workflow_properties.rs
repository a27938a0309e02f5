//! End-to-end workflow behaviour through the public service API.

use std::sync::Arc;
use std::time::Duration;

use docflow_engine::{DocumentService, EngineConfig, EngineError, Outcome};
use docflow_storage::{DocumentAction, DocumentId, DocumentStatus, DocumentStorage, InMemoryStorage};

fn service() -> DocumentService<InMemoryStorage> {
    DocumentService::new(Arc::new(InMemoryStorage::new()), &EngineConfig::default())
}

fn actions(doc: &docflow_engine::DocumentWithHistory) -> Vec<DocumentAction> {
    doc.history.iter().map(|h| h.action).collect()
}

#[tokio::test]
async fn create_submit_approve_scenario() {
    let s = service();

    let created = s.create("A", "T").await.unwrap();
    assert_eq!(created.status, DocumentStatus::Draft);
    assert_eq!(created.version, 0);

    s.submit(created.id, "u1").await.unwrap();
    let submitted = s.get_with_history(created.id).await.unwrap();
    assert_eq!(submitted.document.status, DocumentStatus::Submitted);
    assert_eq!(actions(&submitted), vec![DocumentAction::Submit]);

    s.approve(created.id, "u2").await.unwrap();
    let approved = s.get_with_history(created.id).await.unwrap();
    assert_eq!(approved.document.status, DocumentStatus::Approved);
    assert_eq!(approved.document.version, 2);
    assert_eq!(
        actions(&approved),
        vec![DocumentAction::Submit, DocumentAction::Approve]
    );
    assert_eq!(approved.history[1].initiator, "u2");
    assert_eq!(
        s.storage().count_registry_entries(created.id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn approve_batch_tolerates_partial_failure() {
    let s = service();
    let ready = s.create("A", "ready").await.unwrap().id;
    let draft = s.create("A", "draft").await.unwrap().id;
    let unknown = DocumentId::new();
    s.submit(ready, "u1").await.unwrap();

    let outcomes = s
        .approve_batch(&[ready, unknown, draft], "batch-user")
        .await
        .unwrap();

    assert_eq!(outcomes[&ready], Outcome::Success);
    assert_eq!(outcomes[&unknown], Outcome::NotFound);
    assert_eq!(outcomes[&draft], Outcome::Conflict);

    let draft_doc = s.get_with_history(draft).await.unwrap();
    assert_eq!(draft_doc.document.status, DocumentStatus::Draft);
    assert!(draft_doc.history.is_empty());
    assert_eq!(s.storage().count_registry_entries(draft).await.unwrap(), 0);
}

#[tokio::test]
async fn reapproval_is_a_conflict_without_side_effects() {
    let s = service();
    let id = s.create("A", "T").await.unwrap().id;
    s.submit(id, "u1").await.unwrap();
    s.approve(id, "u2").await.unwrap();

    for _ in 0..3 {
        match s.approve(id, "u3").await {
            Err(EngineError::Transition(e)) => assert!(e.is_conflict()),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
    let outcomes = s.approve_batch(&[id], "u3").await.unwrap();
    assert_eq!(outcomes[&id], Outcome::Conflict);

    let doc = s.get_with_history(id).await.unwrap();
    assert_eq!(doc.document.version, 2);
    assert_eq!(
        actions(&doc),
        vec![DocumentAction::Submit, DocumentAction::Approve]
    );
    assert_eq!(s.storage().count_registry_entries(id).await.unwrap(), 1);
}

#[tokio::test]
async fn statuses_never_regress() {
    let s = service();
    let id = s.create("A", "T").await.unwrap().id;
    let mut seen = vec![s.get_with_history(id).await.unwrap().document.status];

    // Every call in every order; only forward moves may succeed.
    for step in 0..6 {
        let _ = if step % 2 == 0 {
            s.approve(id, "u").await
        } else {
            s.submit(id, "u").await
        };
        seen.push(s.get_with_history(id).await.unwrap().document.status);
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last(), Some(&DocumentStatus::Approved));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_report_for_submitted_document() {
    let s = service();
    let id = s.create("A", "T").await.unwrap().id;
    s.submit(id, "u1").await.unwrap();

    let report = s.test_concurrency(id, 5, 10).await.unwrap();

    assert_eq!(report.success_count, 1);
    assert_eq!(report.conflict_count, 9);
    assert_eq!(report.error_count, 0);
    assert_eq!(report.final_status, "APPROVED");

    let doc = s.get_with_history(id).await.unwrap();
    assert_eq!(doc.history.len(), 2);
    assert_eq!(doc.history[1].initiator, "CONCURRENCY_TESTER");
    assert_eq!(s.storage().count_registry_entries(id).await.unwrap(), 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["successCount"], 1);
    assert_eq!(json["finalStatus"], "APPROVED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_never_double_register() {
    let s = Arc::new(service());
    let mut ids = Vec::new();
    for i in 0..8 {
        let id = s.create("A", &format!("doc {i}")).await.unwrap().id;
        s.submit(id, "u1").await.unwrap();
        ids.push(id);
    }

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let s = Arc::clone(&s);
        let ids = ids.clone();
        tasks.push(tokio::spawn(async move {
            s.approve_batch(&ids, &format!("worker-{worker}")).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        let outcomes = task.await.unwrap().unwrap();
        successes += outcomes.values().filter(|o| o.is_success()).count();
    }

    assert_eq!(successes, ids.len());
    for id in ids {
        assert_eq!(s.storage().count_registry_entries(id).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn get_many_skips_unknown_ids() {
    let s = service();
    let a = s.create("A", "a").await.unwrap().id;
    let b = s.create("B", "b").await.unwrap().id;

    let docs = s.get_many(&[a, DocumentId::new(), b]).await.unwrap();
    let ids: Vec<DocumentId> = docs.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![a, b]);
}

#[tokio::test]
async fn unique_numbers_are_distinct() {
    let s = service();
    let mut numbers = std::collections::HashSet::new();
    for i in 0..50 {
        let doc = s.create("A", &format!("doc {i}")).await.unwrap();
        assert!(numbers.insert(doc.unique_number));
    }
}

mod slow_backend {
    use super::*;

    use async_trait::async_trait;
    use docflow_storage::{
        DocumentRecord, HistoryRecord, MemorySnapshot, RegistryRecord, StorageError,
    };
    use time::OffsetDateTime;

    /// In-memory store that stalls snapshot reads of one document.
    struct SlowStorage {
        inner: InMemoryStorage,
        slow: std::sync::Mutex<Option<DocumentId>>,
        stall: Duration,
    }

    #[async_trait]
    impl DocumentStorage for SlowStorage {
        type Snapshot = MemorySnapshot;

        async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
            self.inner.begin_snapshot().await
        }
        async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
            self.inner.commit_snapshot(snapshot).await
        }
        async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
            self.inner.abort_snapshot(snapshot).await
        }
        async fn insert_document(
            &self,
            snapshot: &mut MemorySnapshot,
            record: DocumentRecord,
        ) -> Result<(), StorageError> {
            self.inner.insert_document(snapshot, record).await
        }
        async fn get_document_in_snapshot(
            &self,
            snapshot: &mut MemorySnapshot,
            id: DocumentId,
        ) -> Result<DocumentRecord, StorageError> {
            let is_slow = *self.slow.lock().unwrap() == Some(id);
            if is_slow {
                tokio::time::sleep(self.stall).await;
            }
            self.inner.get_document_in_snapshot(snapshot, id).await
        }
        async fn update_document_status(
            &self,
            snapshot: &mut MemorySnapshot,
            id: DocumentId,
            expected_version: i64,
            new_status: DocumentStatus,
            updated_at: OffsetDateTime,
        ) -> Result<i64, StorageError> {
            self.inner
                .update_document_status(snapshot, id, expected_version, new_status, updated_at)
                .await
        }
        async fn insert_history_entry(
            &self,
            snapshot: &mut MemorySnapshot,
            record: HistoryRecord,
        ) -> Result<(), StorageError> {
            self.inner.insert_history_entry(snapshot, record).await
        }
        async fn insert_registry_entry(
            &self,
            snapshot: &mut MemorySnapshot,
            record: RegistryRecord,
        ) -> Result<(), StorageError> {
            self.inner.insert_registry_entry(snapshot, record).await
        }
        async fn get_document(&self, id: DocumentId) -> Result<DocumentRecord, StorageError> {
            self.inner.get_document(id).await
        }
        async fn get_documents(
            &self,
            ids: &[DocumentId],
        ) -> Result<Vec<DocumentRecord>, StorageError> {
            self.inner.get_documents(ids).await
        }
        async fn list_history(&self, id: DocumentId) -> Result<Vec<HistoryRecord>, StorageError> {
            self.inner.list_history(id).await
        }
        async fn list_ids_by_status(
            &self,
            status: DocumentStatus,
            limit: usize,
        ) -> Result<Vec<DocumentId>, StorageError> {
            self.inner.list_ids_by_status(status, limit).await
        }
        async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StorageError> {
            self.inner.count_by_status(status).await
        }
        async fn get_registry_entry(
            &self,
            document_id: DocumentId,
        ) -> Result<Option<RegistryRecord>, StorageError> {
            self.inner.get_registry_entry(document_id).await
        }
        async fn count_registry_entries(
            &self,
            document_id: DocumentId,
        ) -> Result<u64, StorageError> {
            self.inner.count_registry_entries(document_id).await
        }
    }

    #[tokio::test]
    async fn hung_item_reports_error_and_batch_continues() {
        let storage = Arc::new(SlowStorage {
            inner: InMemoryStorage::new(),
            slow: std::sync::Mutex::new(None),
            stall: Duration::from_secs(5),
        });
        let mut config = EngineConfig::default();
        config.transition_timeout_ms = 50;
        let s = DocumentService::new(Arc::clone(&storage), &config);

        let hung = s.create("A", "hung").await.unwrap().id;
        let fine = s.create("A", "fine").await.unwrap().id;
        *storage.slow.lock().unwrap() = Some(hung);

        let outcomes = s.submit_batch(&[hung, fine], "u1").await.unwrap();

        assert_eq!(outcomes[&hung], Outcome::Error);
        assert_eq!(outcomes[&fine], Outcome::Success);
        let hung_doc = s.get_with_history(hung).await.unwrap();
        assert_eq!(hung_doc.document.status, DocumentStatus::Draft);
        assert!(hung_doc.history.is_empty());
    }
}

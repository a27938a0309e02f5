//! Document approval workflow engine.
//!
//! Documents move DRAFT -> SUBMITTED -> APPROVED. Every move is a single
//! optimistic unit of work against a [`DocumentStorage`] backend: the status
//! write is conditioned on the version read, the history entry is appended in
//! the same snapshot, and approval inserts the document's one registry entry.
//!
//! - [`TransitionProcessor`]: one transition, one snapshot
//! - [`BatchProcessor`]: many documents, failures isolated per item
//! - [`Scheduler`]: timers that drain the DRAFT and SUBMITTED queues
//! - [`ConcurrencyHarness`]: simultaneous approvals against one document
//! - [`DocumentService`]: the facade used by the HTTP layer and CLI
//!
//! [`DocumentStorage`]: docflow_storage::DocumentStorage

pub mod batch;
pub mod config;
pub mod error;
pub mod harness;
pub mod scheduler;
pub mod service;
pub mod transition;

pub use batch::{success_count, BatchOutcomes, BatchProcessor};
pub use config::{ConfigError, EngineConfig, TickPolicy, WorkerConfig};
pub use error::{EngineError, ErrorKind, HarnessError, Outcome, TransitionError};
pub use harness::{
    ConcurrencyHarness, ConcurrencyReport, HARNESS_INITIATOR, MAX_ATTEMPTS, MAX_WORKERS,
};
pub use scheduler::{Scheduler, SchedulerHandle, Stage, TickReport};
pub use service::{DocumentService, DocumentWithHistory};
pub use transition::{Transition, TransitionProcessor, TransitionReceipt};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use docflow_storage::{
        DocumentId, DocumentRecord, DocumentStatus, DocumentStorage, RegistryRecord,
    };
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Commit a fresh DRAFT document and return its id.
    pub async fn seed_document<S: DocumentStorage>(
        storage: &Arc<S>,
        author: &str,
        title: &str,
    ) -> DocumentId {
        let now = OffsetDateTime::now_utc();
        let id = DocumentId::new();
        let record = DocumentRecord {
            id,
            unique_number: format!("DOC-{}", &id.to_string()[..8]),
            author: author.to_string(),
            title: title.to_string(),
            status: DocumentStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.insert_document(&mut snap, record).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        id
    }

    /// Register a document out of band so its approval can never succeed.
    pub async fn preregister<S: DocumentStorage>(storage: &Arc<S>, id: DocumentId) {
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_registry_entry(
                &mut snap,
                RegistryRecord {
                    id: Uuid::new_v4(),
                    document_id: id,
                    registered_at: OffsetDateTime::now_utc(),
                },
            )
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
    }
}

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{DocumentId, DocumentRecord, DocumentStatus, HistoryRecord, RegistryRecord};

/// The storage trait for document workflow backends.
///
/// A `DocumentStorage` implementation provides durable, transactional storage
/// for documents, their audit history, and the approval registry.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress unit of work. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a unit of work, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the unit of work
///    OR `abort_snapshot(snapshot)`: roll back and consume it
///
/// If a `Snapshot` is dropped without committing, nothing it wrote may
/// become visible.
///
/// ## OCC Conflict Detection
///
/// `update_document_status` is a conditional write:
/// `UPDATE ... SET version = version + 1 WHERE id = ? AND version = expected_version`.
/// Reads never lock. A backend may report a stale `expected_version` eagerly,
/// but `commit_snapshot` MUST re-check it atomically with the rest of the
/// snapshot and fail with `StorageError::ConcurrentConflict` if another
/// commit got there first. A failed commit applies nothing.
///
/// ## Registry Uniqueness
///
/// At most one registry entry may exist per document. A commit that would
/// create a second one fails with `StorageError::DuplicateRegistryEntry`,
/// independently of any status check done by the caller.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across
/// tokio tasks and axum application state.
#[async_trait]
pub trait DocumentStorage: Send + Sync + 'static {
    /// The snapshot (unit of work) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (unit of work).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all of its writes visible at once.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all of its writes.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Document operations (within snapshot) ─────────────────────────────────

    /// Insert a new document. The record's version must be 0.
    ///
    /// Returns `AlreadyExists` or `DuplicateUniqueNumber` on collision.
    async fn insert_document(
        &self,
        snapshot: &mut Self::Snapshot,
        record: DocumentRecord,
    ) -> Result<(), StorageError>;

    /// Read a document as seen by this snapshot (committed state plus the
    /// snapshot's own pending writes). Does not lock.
    ///
    /// Returns `Err(StorageError::DocumentNotFound)` if the document does not exist.
    async fn get_document_in_snapshot(
        &self,
        snapshot: &mut Self::Snapshot,
        id: DocumentId,
    ) -> Result<DocumentRecord, StorageError>;

    /// Apply a version-validated status change (OCC).
    ///
    /// Returns the new version number (`expected_version + 1`).
    async fn update_document_status(
        &self,
        snapshot: &mut Self::Snapshot,
        id: DocumentId,
        expected_version: i64,
        new_status: DocumentStatus,
        updated_at: OffsetDateTime,
    ) -> Result<i64, StorageError>;

    // ── Recording operations (within snapshot) ────────────────────────────────

    /// Append an audit history entry.
    ///
    /// FK: `document_id` must reference an existing document.
    async fn insert_history_entry(
        &self,
        snapshot: &mut Self::Snapshot,
        record: HistoryRecord,
    ) -> Result<(), StorageError>;

    /// Insert a registry entry.
    ///
    /// UNIQUE(`document_id`): must fail the snapshot if one already exists.
    async fn insert_registry_entry(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RegistryRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read a document's committed state.
    ///
    /// Returns `Err(StorageError::DocumentNotFound)` if the document does not exist.
    async fn get_document(&self, id: DocumentId) -> Result<DocumentRecord, StorageError>;

    /// Read several documents; unknown ids are skipped.
    async fn get_documents(&self, ids: &[DocumentId])
        -> Result<Vec<DocumentRecord>, StorageError>;

    /// The committed history of a document, oldest first.
    async fn list_history(&self, id: DocumentId) -> Result<Vec<HistoryRecord>, StorageError>;

    /// Ids of documents in `status`, oldest `created_at` first, at most `limit`.
    async fn list_ids_by_status(
        &self,
        status: DocumentStatus,
        limit: usize,
    ) -> Result<Vec<DocumentId>, StorageError>;

    /// Number of documents currently in `status`.
    async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StorageError>;

    /// The registry entry for a document, if it was approved.
    async fn get_registry_entry(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<RegistryRecord>, StorageError>;

    /// Number of registry entries for a document (0 or 1 for a correct backend).
    async fn count_registry_entries(&self, document_id: DocumentId) -> Result<u64, StorageError>;
}

//! In-process `DocumentStorage` backend.
//!
//! All three tables live behind a single mutex. A [`MemorySnapshot`] buffers
//! its writes; nothing touches the tables until `commit_snapshot`, which
//! re-validates every conditional write and uniqueness constraint and then
//! applies the whole snapshot under the same lock acquisition. Reads never
//! hold the lock across an await point, so concurrent units of work only meet
//! at commit time.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{DocumentId, DocumentRecord, DocumentStatus, HistoryRecord, RegistryRecord};
use crate::traits::DocumentStorage;

/// Shared in-memory store. Wrap in an `Arc` to share between tasks.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    documents: HashMap<DocumentId, StoredDocument>,
    unique_numbers: HashSet<String>,
    history: HashMap<DocumentId, Vec<HistoryRecord>>,
    registry: HashMap<DocumentId, RegistryRecord>,
    /// Insertion counter; breaks `created_at` ties when ordering the queue.
    next_seq: u64,
}

struct StoredDocument {
    record: DocumentRecord,
    seq: u64,
}

/// Pending writes of one unit of work against [`InMemoryStorage`].
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    inserts: Vec<DocumentRecord>,
    updates: Vec<PendingUpdate>,
    history: Vec<HistoryRecord>,
    registry: Vec<RegistryRecord>,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    id: DocumentId,
    expected_version: i64,
    new_status: DocumentStatus,
    updated_at: OffsetDateTime,
}

impl PendingUpdate {
    fn apply_to(&self, record: &mut DocumentRecord) {
        record.status = self.new_status;
        record.version = self.expected_version + 1;
        record.updated_at = self.updated_at;
    }
}

impl MemorySnapshot {
    /// The document as this snapshot sees it: its own insert or the committed
    /// row, with its own pending updates layered on top.
    fn view(&self, committed: Option<&DocumentRecord>, id: DocumentId) -> Option<DocumentRecord> {
        let mut record = self
            .inserts
            .iter()
            .find(|d| d.id == id)
            .or(committed)
            .cloned()?;
        for update in self.updates.iter().filter(|u| u.id == id) {
            update.apply_to(&mut record);
        }
        Some(record)
    }

    fn inserts_document(&self, id: DocumentId) -> bool {
        self.inserts.iter().any(|d| d.id == id)
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Backend("in-memory tables lock poisoned".to_string()))
    }
}

impl Tables {
    fn committed(&self, id: DocumentId) -> Option<&DocumentRecord> {
        self.documents.get(&id).map(|d| &d.record)
    }

    /// Check every write in `snap` against the current tables without
    /// mutating anything.
    fn validate(&self, snap: &MemorySnapshot) -> Result<(), StorageError> {
        let mut new_numbers = HashSet::new();
        for doc in &snap.inserts {
            if self.documents.contains_key(&doc.id) {
                return Err(StorageError::AlreadyExists {
                    document_id: doc.id,
                });
            }
            if self.unique_numbers.contains(&doc.unique_number)
                || !new_numbers.insert(doc.unique_number.as_str())
            {
                return Err(StorageError::DuplicateUniqueNumber {
                    unique_number: doc.unique_number.clone(),
                });
            }
        }

        // Replay conditional writes in order; each must see the version the
        // previous one produced.
        let mut versions: HashMap<DocumentId, i64> = HashMap::new();
        for update in &snap.updates {
            let current = match versions.get(&update.id) {
                Some(v) => *v,
                None => match self.committed(update.id) {
                    Some(doc) => doc.version,
                    None if snap.inserts_document(update.id) => 0,
                    None => {
                        return Err(StorageError::DocumentNotFound {
                            document_id: update.id,
                        })
                    }
                },
            };
            if current != update.expected_version {
                return Err(StorageError::ConcurrentConflict {
                    document_id: update.id,
                    expected_version: update.expected_version,
                });
            }
            versions.insert(update.id, current + 1);
        }

        let exists = |id: DocumentId| self.documents.contains_key(&id) || snap.inserts_document(id);

        for entry in &snap.history {
            if !exists(entry.document_id) {
                return Err(StorageError::DanglingReference {
                    document_id: entry.document_id,
                });
            }
        }

        let mut registered = HashSet::new();
        for entry in &snap.registry {
            if !exists(entry.document_id) {
                return Err(StorageError::DanglingReference {
                    document_id: entry.document_id,
                });
            }
            if self.registry.contains_key(&entry.document_id)
                || !registered.insert(entry.document_id)
            {
                return Err(StorageError::DuplicateRegistryEntry {
                    document_id: entry.document_id,
                });
            }
        }

        Ok(())
    }

    /// Apply an already-validated snapshot.
    fn apply(&mut self, snap: MemorySnapshot) {
        for doc in snap.inserts {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.unique_numbers.insert(doc.unique_number.clone());
            self.documents
                .insert(doc.id, StoredDocument { record: doc, seq });
        }
        for update in &snap.updates {
            if let Some(stored) = self.documents.get_mut(&update.id) {
                update.apply_to(&mut stored.record);
            }
        }
        for entry in snap.history {
            self.history.entry(entry.document_id).or_default().push(entry);
        }
        for entry in snap.registry {
            self.registry.insert(entry.document_id, entry);
        }
    }
}

#[async_trait]
impl DocumentStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.validate(&snapshot)?;
        tables.apply(snapshot);
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_document(
        &self,
        snapshot: &mut MemorySnapshot,
        record: DocumentRecord,
    ) -> Result<(), StorageError> {
        if record.version != 0 {
            return Err(StorageError::Backend(format!(
                "new document {} must start at version 0, got {}",
                record.id, record.version
            )));
        }
        let tables = self.lock()?;
        if tables.documents.contains_key(&record.id) || snapshot.inserts_document(record.id) {
            return Err(StorageError::AlreadyExists {
                document_id: record.id,
            });
        }
        if tables.unique_numbers.contains(&record.unique_number)
            || snapshot
                .inserts
                .iter()
                .any(|d| d.unique_number == record.unique_number)
        {
            return Err(StorageError::DuplicateUniqueNumber {
                unique_number: record.unique_number,
            });
        }
        drop(tables);
        snapshot.inserts.push(record);
        Ok(())
    }

    async fn get_document_in_snapshot(
        &self,
        snapshot: &mut MemorySnapshot,
        id: DocumentId,
    ) -> Result<DocumentRecord, StorageError> {
        let tables = self.lock()?;
        snapshot
            .view(tables.committed(id), id)
            .ok_or(StorageError::DocumentNotFound { document_id: id })
    }

    async fn update_document_status(
        &self,
        snapshot: &mut MemorySnapshot,
        id: DocumentId,
        expected_version: i64,
        new_status: DocumentStatus,
        updated_at: OffsetDateTime,
    ) -> Result<i64, StorageError> {
        let current = {
            let tables = self.lock()?;
            snapshot
                .view(tables.committed(id), id)
                .ok_or(StorageError::DocumentNotFound { document_id: id })?
        };
        // Eager check; commit re-checks against whatever is committed by then.
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                document_id: id,
                expected_version,
            });
        }
        snapshot.updates.push(PendingUpdate {
            id,
            expected_version,
            new_status,
            updated_at,
        });
        Ok(expected_version + 1)
    }

    async fn insert_history_entry(
        &self,
        snapshot: &mut MemorySnapshot,
        record: HistoryRecord,
    ) -> Result<(), StorageError> {
        let known = {
            let tables = self.lock()?;
            tables.documents.contains_key(&record.document_id)
        };
        if !known && !snapshot.inserts_document(record.document_id) {
            return Err(StorageError::DanglingReference {
                document_id: record.document_id,
            });
        }
        snapshot.history.push(record);
        Ok(())
    }

    async fn insert_registry_entry(
        &self,
        snapshot: &mut MemorySnapshot,
        record: RegistryRecord,
    ) -> Result<(), StorageError> {
        let (known, registered) = {
            let tables = self.lock()?;
            (
                tables.documents.contains_key(&record.document_id),
                tables.registry.contains_key(&record.document_id),
            )
        };
        if !known && !snapshot.inserts_document(record.document_id) {
            return Err(StorageError::DanglingReference {
                document_id: record.document_id,
            });
        }
        if registered
            || snapshot
                .registry
                .iter()
                .any(|r| r.document_id == record.document_id)
        {
            return Err(StorageError::DuplicateRegistryEntry {
                document_id: record.document_id,
            });
        }
        snapshot.registry.push(record);
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<DocumentRecord, StorageError> {
        let tables = self.lock()?;
        tables
            .committed(id)
            .cloned()
            .ok_or(StorageError::DocumentNotFound { document_id: id })
    }

    async fn get_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let tables = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.committed(*id).cloned())
            .collect())
    }

    async fn list_history(&self, id: DocumentId) -> Result<Vec<HistoryRecord>, StorageError> {
        let tables = self.lock()?;
        let mut entries = tables.history.get(&id).cloned().unwrap_or_default();
        // Appends arrive in commit order; the stable sort keeps that order for
        // entries sharing a timestamp.
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn list_ids_by_status(
        &self,
        status: DocumentStatus,
        limit: usize,
    ) -> Result<Vec<DocumentId>, StorageError> {
        let tables = self.lock()?;
        let mut matching: Vec<&StoredDocument> = tables
            .documents
            .values()
            .filter(|d| d.record.status == status)
            .collect();
        matching.sort_by_key(|d| (d.record.created_at, d.seq));
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|d| d.record.id)
            .collect())
    }

    async fn count_by_status(&self, status: DocumentStatus) -> Result<u64, StorageError> {
        let tables = self.lock()?;
        Ok(tables
            .documents
            .values()
            .filter(|d| d.record.status == status)
            .count() as u64)
    }

    async fn get_registry_entry(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<RegistryRecord>, StorageError> {
        let tables = self.lock()?;
        Ok(tables.registry.get(&document_id).cloned())
    }

    async fn count_registry_entries(&self, document_id: DocumentId) -> Result<u64, StorageError> {
        let tables = self.lock()?;
        Ok(u64::from(tables.registry.contains_key(&document_id)))
    }
}

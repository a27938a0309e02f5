use crate::record::DocumentId;

/// All errors that can be returned by a DocumentStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another unit of work advanced
    /// the document's version since it was read.
    #[error("concurrent conflict on document {document_id}: expected version {expected_version}")]
    ConcurrentConflict {
        document_id: DocumentId,
        expected_version: i64,
    },

    /// No document with the given id.
    #[error("document not found: {document_id}")]
    DocumentNotFound { document_id: DocumentId },

    /// A document with this id already exists.
    #[error("document already exists: {document_id}")]
    AlreadyExists { document_id: DocumentId },

    /// Another document already carries this human-facing number.
    #[error("unique number already in use: {unique_number}")]
    DuplicateUniqueNumber { unique_number: String },

    /// A registry entry already exists for this document.
    #[error("registry entry already exists for document {document_id}")]
    DuplicateRegistryEntry { document_id: DocumentId },

    /// A history or registry row references a document that does not exist.
    #[error("record references unknown document {document_id}")]
    DanglingReference { document_id: DocumentId },

    /// A backend-specific storage error (connection, lock poisoning, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

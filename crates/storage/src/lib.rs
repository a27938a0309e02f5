//! Document Store contract for the docflow workflow engine.
//!
//! Defines the [`DocumentStorage`] trait (snapshot-based units of work with
//! optimistic concurrency control), the persisted record types, the error
//! taxonomy, an in-memory backend, and a backend-agnostic conformance suite.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{
    DocumentAction, DocumentId, DocumentRecord, DocumentStatus, HistoryRecord, RegistryRecord,
};
pub use traits::DocumentStorage;

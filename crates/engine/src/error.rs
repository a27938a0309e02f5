//! Error taxonomy for the transition core.
//!
//! [`TransitionError`] is the closed set of ways a single transition can
//! fail. Callers classify it through [`TransitionError::kind`] or
//! [`Outcome::from`], never by inspecting the message.

use std::fmt;

use docflow_storage::{DocumentAction, DocumentId, DocumentStatus, StorageError};
use serde::{Deserialize, Serialize};

/// Failure of one submit or approve call. The store is unchanged whenever
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("document {document_id} not found")]
    NotFound { document_id: DocumentId },

    #[error("cannot {action} document {document_id} in status {current}")]
    InvalidTransition {
        document_id: DocumentId,
        current: DocumentStatus,
        action: DocumentAction,
    },

    #[error("document {document_id} was modified concurrently (expected version {expected_version})")]
    VersionConflict {
        document_id: DocumentId,
        expected_version: i64,
    },

    #[error("document {document_id} is already registered")]
    RegistryViolation { document_id: DocumentId },

    #[error("unexpected failure processing document {document_id}: {message}")]
    Unexpected {
        document_id: DocumentId,
        message: String,
    },
}

/// Discriminant of [`TransitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    VersionConflict,
    RegistryViolation,
    Unexpected,
}

impl TransitionError {
    /// Map a storage failure raised while working on `document_id`.
    pub(crate) fn from_storage(document_id: DocumentId, err: StorageError) -> Self {
        match err {
            StorageError::DocumentNotFound { document_id } => Self::NotFound { document_id },
            StorageError::ConcurrentConflict {
                document_id,
                expected_version,
            } => Self::VersionConflict {
                document_id,
                expected_version,
            },
            StorageError::DuplicateRegistryEntry { document_id } => {
                Self::RegistryViolation { document_id }
            }
            other => Self::Unexpected {
                document_id,
                message: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::RegistryViolation { .. } => ErrorKind::RegistryViolation,
            Self::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// True for the failures that are the expected shape of contention:
    /// a lost version race, a stale precondition, or a duplicate registration.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidTransition | ErrorKind::VersionConflict | ErrorKind::RegistryViolation
        )
    }

    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::NotFound { document_id }
            | Self::InvalidTransition { document_id, .. }
            | Self::VersionConflict { document_id, .. }
            | Self::RegistryViolation { document_id }
            | Self::Unexpected { document_id, .. } => *document_id,
        }
    }
}

/// Per-item result code of a batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    NotFound,
    /// Either a stale precondition or a lost version race.
    Conflict,
    RegistryError,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::NotFound => "NOT_FOUND",
            Outcome::Conflict => "CONFLICT",
            Outcome::RegistryError => "REGISTRY_ERROR",
            Outcome::Error => "ERROR",
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&TransitionError> for Outcome {
    fn from(err: &TransitionError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Outcome::NotFound,
            ErrorKind::InvalidTransition | ErrorKind::VersionConflict => Outcome::Conflict,
            ErrorKind::RegistryViolation => Outcome::RegistryError,
            ErrorKind::Unexpected => Outcome::Error,
        }
    }
}

/// Errors from the service facade outside a single transition.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("document {0} not found")]
    NotFound(DocumentId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors that stop a concurrency run from producing a report.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("{field} {value} exceeds the limit of {limit}")]
    LimitExceeded {
        field: &'static str,
        value: usize,
        limit: usize,
    },

    #[error("storage error reading final status: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> DocumentId {
        DocumentId::new()
    }

    #[test]
    fn conflict_kinds_fold_together() {
        let d = id();
        let invalid = TransitionError::InvalidTransition {
            document_id: d,
            current: DocumentStatus::Draft,
            action: DocumentAction::Approve,
        };
        let version = TransitionError::VersionConflict {
            document_id: d,
            expected_version: 1,
        };
        let registry = TransitionError::RegistryViolation { document_id: d };
        let missing = TransitionError::NotFound { document_id: d };

        assert!(invalid.is_conflict());
        assert!(version.is_conflict());
        assert!(registry.is_conflict());
        assert!(!missing.is_conflict());

        assert_eq!(Outcome::from(&invalid), Outcome::Conflict);
        assert_eq!(Outcome::from(&version), Outcome::Conflict);
        assert_eq!(Outcome::from(&registry), Outcome::RegistryError);
        assert_eq!(Outcome::from(&missing), Outcome::NotFound);
    }

    #[test]
    fn storage_errors_map_by_variant() {
        let d = id();
        let mapped = TransitionError::from_storage(
            d,
            StorageError::ConcurrentConflict {
                document_id: d,
                expected_version: 3,
            },
        );
        assert_eq!(
            mapped,
            TransitionError::VersionConflict {
                document_id: d,
                expected_version: 3
            }
        );

        let mapped = TransitionError::from_storage(d, StorageError::Backend("disk".into()));
        assert_eq!(mapped.kind(), ErrorKind::Unexpected);
        assert_eq!(Outcome::from(&mapped), Outcome::Error);
    }

    #[test]
    fn outcome_serializes_as_code() {
        let json = serde_json::to_string(&Outcome::RegistryError).unwrap();
        assert_eq!(json, "\"REGISTRY_ERROR\"");
        assert_eq!(Outcome::NotFound.to_string(), "NOT_FOUND");
    }
}

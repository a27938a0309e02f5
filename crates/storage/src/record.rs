use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque identity of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DocumentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Workflow status of a document.
///
/// The derived ordering is the workflow order: `Draft < Submitted < Approved`.
/// A document's status only ever moves to its immediate successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    Approved,
}

impl DocumentStatus {
    /// The single status reachable from this one, if any.
    pub fn next(self) -> Option<DocumentStatus> {
        match self {
            DocumentStatus::Draft => Some(DocumentStatus::Submitted),
            DocumentStatus::Submitted => Some(DocumentStatus::Approved),
            DocumentStatus::Approved => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Submitted => "SUBMITTED",
            DocumentStatus::Approved => "APPROVED",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action recorded in the audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentAction {
    Submit,
    Approve,
}

impl DocumentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentAction::Submit => "SUBMIT",
            DocumentAction::Approve => "APPROVE",
        }
    }
}

impl fmt::Display for DocumentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as stored in the backend (`documents` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    /// Human-facing number, unique across all documents (e.g. `DOC-1A2B3C4D`).
    pub unique_number: String,
    pub author: String,
    pub title: String,
    pub status: DocumentStatus,
    /// Optimistic-lock counter. Starts at 0, +1 on every committed update.
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One immutable audit entry (`document_history` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: Uuid,
    pub document_id: DocumentId,
    /// User name or background actor (e.g. `SUBMIT-WORKER`).
    pub initiator: String,
    pub action: DocumentAction,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub comment: String,
}

/// Proof that a document was approved (`registry_entries` table).
///
/// At most one per document; the backend enforces this as a hard
/// uniqueness constraint on `document_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub id: Uuid,
    pub document_id: DocumentId,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

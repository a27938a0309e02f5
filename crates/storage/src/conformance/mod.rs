//! Conformance test suite for `DocumentStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `DocumentStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Initialization**: document creation, duplicate id / number detection
//! - **Error handling**: correct error variants for missing documents and
//!   dangling references
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: status, history and registry writes are all-or-nothing
//! - **Version validation / OCC**: conditional writes and stale-version detection
//! - **Registry uniqueness**: at most one registry entry per document
//! - **Concurrency**: real task races on one document
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use docflow_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod init;
mod registry;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::record::{
    DocumentAction, DocumentId, DocumentRecord, DocumentStatus, HistoryRecord, RegistryRecord,
};
use crate::DocumentStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_creates_document_at_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation. The concurrent category spawns
/// tokio tasks, so the caller must be inside a tokio runtime.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(registry::run_registry_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_document(unique_number: &str) -> DocumentRecord {
    let now = OffsetDateTime::now_utc();
    DocumentRecord {
        id: DocumentId::new(),
        unique_number: unique_number.to_string(),
        author: "test-author".to_string(),
        title: "Test document".to_string(),
        status: DocumentStatus::Draft,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

fn make_history(document_id: DocumentId, action: DocumentAction) -> HistoryRecord {
    HistoryRecord {
        id: Uuid::new_v4(),
        document_id,
        initiator: "test-initiator".to_string(),
        action,
        created_at: OffsetDateTime::now_utc(),
        comment: format!("{action} by conformance suite"),
    }
}

fn make_registry(document_id: DocumentId) -> RegistryRecord {
    RegistryRecord {
        id: Uuid::new_v4(),
        document_id,
        registered_at: OffsetDateTime::now_utc(),
    }
}

/// Insert and commit a fresh DRAFT document, returning its id.
async fn seed_document<S: DocumentStorage>(
    s: &S,
    unique_number: &str,
) -> Result<DocumentId, String> {
    let record = make_document(unique_number);
    let id = record.id;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_document(&mut snap, record)
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit insert: {e}"))?;
    Ok(id)
}

/// Commit one conditional status change in its own snapshot.
async fn advance<S: DocumentStorage>(
    s: &S,
    id: DocumentId,
    expected_version: i64,
    status: DocumentStatus,
) -> Result<i64, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let v = s
        .update_document_status(
            &mut snap,
            id,
            expected_version,
            status,
            OffsetDateTime::now_utc(),
        )
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit update: {e}"))?;
    Ok(v)
}

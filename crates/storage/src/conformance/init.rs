use std::future::Future;

use super::{make_document, seed_document, TestResult};
use crate::{DocumentStatus, DocumentStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_creates_document_at_version_0",
        insert_creates_document_at_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_preserves_fields",
        insert_preserves_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "duplicate_id_rejected",
        duplicate_id_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "duplicate_unique_number_rejected",
        duplicate_unique_number_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "new_document_has_no_history_or_registry",
        new_document_has_no_history_or_registry(factory).await,
    ));

    results
}

/// A committed insert is readable in DRAFT at version 0.
async fn insert_creates_document_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-0001").await?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    if rec.status != DocumentStatus::Draft {
        return Err(format!("expected DRAFT, got {}", rec.status));
    }
    Ok(())
}

async fn insert_preserves_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut record = make_document("DOC-0002");
    record.author = "Ada".to_string();
    record.title = "Annual report".to_string();
    let expected = record.clone();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_document(&mut snap, record)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(expected.id).await.map_err(|e| e.to_string())?;
    if rec != expected {
        return Err(format!("stored record differs: {rec:?} vs {expected:?}"));
    }
    Ok(())
}

async fn duplicate_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-0003").await?;

    let mut again = make_document("DOC-0004");
    again.id = id;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let inserted = s.insert_document(&mut snap, again).await;
    let result = match inserted {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::AlreadyExists { document_id }) if document_id == id => Ok(()),
        other => Err(format!("expected AlreadyExists, got {other:?}")),
    }
}

async fn duplicate_unique_number_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_document(&s, "DOC-SAME").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let inserted = s.insert_document(&mut snap, make_document("DOC-SAME")).await;
    let result = match inserted {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::DuplicateUniqueNumber { unique_number }) if unique_number == "DOC-SAME" => {
            Ok(())
        }
        other => Err(format!("expected DuplicateUniqueNumber, got {other:?}")),
    }
}

async fn new_document_has_no_history_or_registry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-0005").await?;

    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    if !history.is_empty() {
        return Err(format!("expected empty history, got {} entries", history.len()));
    }
    let registry = s.count_registry_entries(id).await.map_err(|e| e.to_string())?;
    if registry != 0 {
        return Err(format!("expected 0 registry entries, got {registry}"));
    }
    Ok(())
}

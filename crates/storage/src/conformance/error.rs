use std::future::Future;

use time::OffsetDateTime;

use super::{make_history, make_registry, TestResult};
use crate::{DocumentAction, DocumentId, DocumentStatus, DocumentStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_document_nonexistent",
        get_document_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_document_in_snapshot_nonexistent",
        get_document_in_snapshot_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_document_status_nonexistent",
        update_document_status_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "history_for_unknown_document_rejected",
        history_for_unknown_document_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "registry_for_unknown_document_rejected",
        registry_for_unknown_document_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "queries_empty_for_nonexistent",
        queries_empty_for_nonexistent(factory).await,
    ));

    results
}

async fn get_document_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = DocumentId::new();
    match s.get_document(id).await {
        Err(StorageError::DocumentNotFound { document_id }) if document_id == id => Ok(()),
        other => Err(format!("expected DocumentNotFound, got {other:?}")),
    }
}

async fn get_document_in_snapshot_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = DocumentId::new();
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_document_in_snapshot(&mut snap, id).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DocumentNotFound { document_id }) if document_id == id => Ok(()),
        other => Err(format!("expected DocumentNotFound, got {other:?}")),
    }
}

async fn update_document_status_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_document_status(
            &mut snap,
            DocumentId::new(),
            0,
            DocumentStatus::Submitted,
            OffsetDateTime::now_utc(),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DocumentNotFound { .. }) => Ok(()),
        other => Err(format!("expected DocumentNotFound, got {other:?}")),
    }
}

/// A history row for an unknown document must be rejected either on insert
/// or at commit (FK violation).
async fn history_for_unknown_document_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = DocumentId::new();
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s
        .insert_history_entry(&mut snap, make_history(id, DocumentAction::Submit))
        .await
    {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::DanglingReference { document_id }) if document_id == id => Ok(()),
        other => Err(format!("expected DanglingReference, got {other:?}")),
    }
}

async fn registry_for_unknown_document_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = DocumentId::new();
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s.insert_registry_entry(&mut snap, make_registry(id)).await {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::DanglingReference { document_id }) if document_id == id => Ok(()),
        other => Err(format!("expected DanglingReference, got {other:?}")),
    }
}

async fn queries_empty_for_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = DocumentId::new();

    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    if !history.is_empty() {
        return Err("expected empty history".to_string());
    }
    if s.get_registry_entry(id)
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("expected no registry entry".to_string());
    }
    let docs = s.get_documents(&[id]).await.map_err(|e| e.to_string())?;
    if !docs.is_empty() {
        return Err(format!("expected unknown id to be skipped, got {docs:?}"));
    }
    let queued = s
        .list_ids_by_status(DocumentStatus::Draft, 10)
        .await
        .map_err(|e| e.to_string())?;
    if !queued.is_empty() {
        return Err("expected empty queue".to_string());
    }
    Ok(())
}

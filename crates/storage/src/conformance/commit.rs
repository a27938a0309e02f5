use std::future::Future;

use time::OffsetDateTime;

use super::{make_document, make_history, make_registry, seed_document, TestResult};
use crate::{DocumentAction, DocumentId, DocumentStatus, DocumentStorage};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Status + audit atomicity
    results.push(TestResult::from_result(
        "commit",
        "status_and_history_both_visible_after_commit",
        status_and_history_both_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "status_and_history_neither_visible_after_abort",
        status_and_history_neither_visible_after_abort(factory).await,
    ));

    // Approval pipeline
    results.push(TestResult::from_result(
        "commit",
        "approval_pipeline_all_committed",
        approval_pipeline_all_committed(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "approval_pipeline_all_aborted",
        approval_pipeline_all_aborted(factory).await,
    ));

    // Multi-document snapshots
    results.push(TestResult::from_result(
        "commit",
        "multi_document_insert_all_visible",
        multi_document_insert_all_visible(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "history_preserves_append_order",
        history_preserves_append_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "get_documents_preserves_request_order",
        get_documents_preserves_request_order(factory).await,
    ));

    results
}

/// Run one SUBMIT-shaped unit of work and hand back the open snapshot.
async fn stage_submit<S: DocumentStorage>(
    s: &S,
    id: DocumentId,
) -> Result<S::Snapshot, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_document_status(
        &mut snap,
        id,
        0,
        DocumentStatus::Submitted,
        OffsetDateTime::now_utc(),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.insert_history_entry(&mut snap, make_history(id, DocumentAction::Submit))
        .await
        .map_err(|e| e.to_string())?;
    Ok(snap)
}

async fn status_and_history_both_visible_after_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-C1").await?;
    let snap = stage_submit(&s, id).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Submitted {
        return Err(format!("expected SUBMITTED, got {}", rec.status));
    }
    if history.len() != 1 || history[0].action != DocumentAction::Submit {
        return Err(format!("expected one SUBMIT entry, got {history:?}"));
    }
    Ok(())
}

async fn status_and_history_neither_visible_after_abort<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-C2").await?;
    let snap = stage_submit(&s, id).await?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Draft || rec.version != 0 {
        return Err(format!(
            "aborted status applied: {} v{}",
            rec.status, rec.version
        ));
    }
    if !history.is_empty() {
        return Err("aborted history entry applied".to_string());
    }
    Ok(())
}

async fn approval_pipeline_all_committed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-C3").await?;
    let snap = stage_submit(&s, id).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_document_status(
        &mut snap,
        id,
        1,
        DocumentStatus::Approved,
        OffsetDateTime::now_utc(),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.insert_history_entry(&mut snap, make_history(id, DocumentAction::Approve))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_registry_entry(&mut snap, make_registry(id))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    let registry = s.get_registry_entry(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Approved || rec.version != 2 {
        return Err(format!("expected APPROVED v2, got {} v{}", rec.status, rec.version));
    }
    let actions: Vec<DocumentAction> = history.iter().map(|h| h.action).collect();
    if actions != vec![DocumentAction::Submit, DocumentAction::Approve] {
        return Err(format!("unexpected history {actions:?}"));
    }
    match registry {
        Some(entry) if entry.document_id == id => Ok(()),
        other => Err(format!("expected registry entry for {id}, got {other:?}")),
    }
}

async fn approval_pipeline_all_aborted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-C4").await?;
    let snap = stage_submit(&s, id).await?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_document_status(
        &mut snap,
        id,
        1,
        DocumentStatus::Approved,
        OffsetDateTime::now_utc(),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.insert_history_entry(&mut snap, make_history(id, DocumentAction::Approve))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_registry_entry(&mut snap, make_registry(id))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    let registry = s.count_registry_entries(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Submitted || rec.version != 1 {
        return Err(format!("expected SUBMITTED v1, got {} v{}", rec.status, rec.version));
    }
    if history.len() != 1 {
        return Err(format!("expected only the SUBMIT entry, got {}", history.len()));
    }
    if registry != 0 {
        return Err(format!("expected 0 registry entries, got {registry}"));
    }
    Ok(())
}

async fn multi_document_insert_all_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let docs: Vec<_> = (0..3).map(|i| make_document(&format!("DOC-M{i}"))).collect();
    let ids: Vec<DocumentId> = docs.iter().map(|d| d.id).collect();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for doc in docs {
        s.insert_document(&mut snap, doc)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let count = s
        .count_by_status(DocumentStatus::Draft)
        .await
        .map_err(|e| e.to_string())?;
    if count != 3 {
        return Err(format!("expected 3 drafts, got {count}"));
    }
    let fetched = s.get_documents(&ids).await.map_err(|e| e.to_string())?;
    if fetched.len() != 3 {
        return Err(format!("expected 3 documents, got {}", fetched.len()));
    }
    Ok(())
}

async fn history_preserves_append_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-C5").await?;

    for action in [DocumentAction::Submit, DocumentAction::Approve] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.insert_history_entry(&mut snap, make_history(id, action))
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    let history = s.list_history(id).await.map_err(|e| e.to_string())?;
    let actions: Vec<DocumentAction> = history.iter().map(|h| h.action).collect();
    if actions != vec![DocumentAction::Submit, DocumentAction::Approve] {
        return Err(format!("history out of order: {actions:?}"));
    }
    Ok(())
}

async fn get_documents_preserves_request_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = seed_document(&s, "DOC-O1").await?;
    let b = seed_document(&s, "DOC-O2").await?;

    let fetched = s
        .get_documents(&[b, DocumentId::new(), a])
        .await
        .map_err(|e| e.to_string())?;
    let order: Vec<DocumentId> = fetched.iter().map(|d| d.id).collect();
    if order != vec![b, a] {
        return Err(format!("expected [b, a], got {order:?}"));
    }
    Ok(())
}

use std::future::Future;

use time::OffsetDateTime;

use super::{make_document, make_history, seed_document, TestResult};
use crate::{DocumentAction, DocumentStatus, DocumentStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_insert_invisible",
        uncommitted_insert_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_update_invisible",
        aborted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_history_invisible",
        uncommitted_history_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_sees_own_update",
        snapshot_sees_own_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "queue_reflects_committed_status_only",
        queue_reflects_committed_status_only(factory).await,
    ));

    results
}

async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let record = make_document("DOC-S1");
    let id = record.id;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_document(&mut snap, record)
        .await
        .map_err(|e| e.to_string())?;

    let visible = s.get_document(id).await;
    let _ = s.abort_snapshot(snap).await;
    match visible {
        Err(StorageError::DocumentNotFound { .. }) => Ok(()),
        other => Err(format!("uncommitted insert leaked: {other:?}")),
    }
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-S2").await?;

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

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Draft || rec.version != 0 {
        return Err(format!(
            "uncommitted update leaked: status {} version {}",
            rec.status, rec.version
        ));
    }

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Submitted || rec.version != 1 {
        return Err(format!(
            "committed update not visible: status {} version {}",
            rec.status, rec.version
        ));
    }
    Ok(())
}

async fn aborted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-S3").await?;

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
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Draft || rec.version != 0 {
        return Err(format!(
            "aborted update applied: status {} version {}",
            rec.status, rec.version
        ));
    }
    Ok(())
}

async fn uncommitted_history_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-S4").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_history_entry(&mut snap, make_history(id, DocumentAction::Submit))
        .await
        .map_err(|e| e.to_string())?;
    let before = s.list_history(id).await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let after = s.list_history(id).await.map_err(|e| e.to_string())?;

    if !before.is_empty() {
        return Err("uncommitted history entry leaked".to_string());
    }
    if after.len() != 1 {
        return Err(format!("expected 1 committed entry, got {}", after.len()));
    }
    Ok(())
}

/// A snapshot reading a document it already updated sees the new status and
/// version.
async fn snapshot_sees_own_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-S5").await?;

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
    let seen = s
        .get_document_in_snapshot(&mut snap, id)
        .await
        .map_err(|e| e.to_string())?;
    let _ = s.abort_snapshot(snap).await;

    if seen.status != DocumentStatus::Submitted || seen.version != 1 {
        return Err(format!(
            "snapshot read: status {} version {}",
            seen.status, seen.version
        ));
    }
    Ok(())
}

async fn queue_reflects_committed_status_only<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-S6").await?;

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

    let drafts = s
        .count_by_status(DocumentStatus::Draft)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    if drafts != 1 {
        return Err(format!("expected 1 draft before commit, got {drafts}"));
    }

    let drafts = s
        .count_by_status(DocumentStatus::Draft)
        .await
        .map_err(|e| e.to_string())?;
    let submitted = s
        .list_ids_by_status(DocumentStatus::Submitted, 10)
        .await
        .map_err(|e| e.to_string())?;
    if drafts != 0 || submitted != vec![id] {
        return Err(format!(
            "after commit: {drafts} drafts, submitted queue {submitted:?}"
        ));
    }
    Ok(())
}

use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;

use super::{advance, make_history, make_registry, seed_document, TestResult};
use crate::{DocumentAction, DocumentId, DocumentStatus, DocumentStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_approvals_register_once",
        concurrent_approvals_register_once(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_documents_all_succeed",
        concurrent_updates_different_documents_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_final_state_consistent",
        concurrent_updates_final_state_consistent(factory).await,
    ));

    results
}

/// Commit a staged snapshot, reporting `Ok(false)` when the commit lost an
/// optimistic race rather than failing outright.
async fn settle<S: DocumentStorage>(
    s: &S,
    snap: S::Snapshot,
    staged: Result<(), StorageError>,
) -> Result<bool, StorageError> {
    let outcome = match staged {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match outcome {
        Ok(()) => Ok(true),
        Err(StorageError::ConcurrentConflict { .. })
        | Err(StorageError::DuplicateRegistryEntry { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// One SUBMITTED -> APPROVED unit of work from version `from`.
async fn stage_approval<S: DocumentStorage>(
    s: &S,
    snap: &mut S::Snapshot,
    id: DocumentId,
    from: i64,
) -> Result<(), StorageError> {
    s.update_document_status(
        snap,
        id,
        from,
        DocumentStatus::Approved,
        OffsetDateTime::now_utc(),
    )
    .await?;
    s.insert_history_entry(snap, make_history(id, DocumentAction::Approve))
        .await?;
    s.insert_registry_entry(snap, make_registry(id)).await
}

/// Join all handles and count how many tasks won their race.
async fn count_winners(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<usize, String> {
    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    Ok(winners)
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and attempt to update the same document from
/// version 0. Exactly one commit succeeds; the rest lose on the version check.
///
/// Unlike the sequential simulation in the `version` module, `tokio::spawn`
/// creates parallel tasks that race against the OCC check.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let id = seed_document(storage.as_ref(), "DOC-P1").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = s
                .update_document_status(
                    &mut snap,
                    id,
                    0,
                    DocumentStatus::Submitted,
                    OffsetDateTime::now_utc(),
                )
                .await
                .map(|_| ());
            settle(s.as_ref(), snap, staged).await
        }));
    }

    let winners = count_winners(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Concurrent approval: one registry entry ─────────────────────────────────

/// N tasks race the full approval pipeline on one SUBMITTED document. Exactly
/// one registry entry and one APPROVE history entry survive.
async fn concurrent_approvals_register_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let id = seed_document(storage.as_ref(), "DOC-P2").await?;
    advance(storage.as_ref(), id, 0, DocumentStatus::Submitted).await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = stage_approval(s.as_ref(), &mut snap, id, 1).await;
            settle(s.as_ref(), snap, staged).await
        }));
    }

    let winners = count_winners(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let registry = storage
        .count_registry_entries(id)
        .await
        .map_err(|e| e.to_string())?;
    if registry != 1 {
        return Err(format!("expected 1 registry entry, got {registry}"));
    }
    let approvals = storage
        .list_history(id)
        .await
        .map_err(|e| e.to_string())?
        .iter()
        .filter(|h| h.action == DocumentAction::Approve)
        .count();
    if approvals != 1 {
        return Err(format!("expected 1 APPROVE history entry, got {approvals}"));
    }
    Ok(())
}

// ── Concurrent updates to different documents: all succeed ──────────────────

/// N tasks each update a different document. No false conflicts when there is
/// no contention.
async fn concurrent_updates_different_documents_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut ids = Vec::with_capacity(N);
    for i in 0..N {
        ids.push(seed_document(storage.as_ref(), &format!("DOC-D{i}")).await?);
    }

    let mut handles = Vec::new();
    for id in ids.iter().copied() {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            s.update_document_status(
                &mut snap,
                id,
                0,
                DocumentStatus::Submitted,
                OffsetDateTime::now_utc(),
            )
            .await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for id in ids {
        let record = storage
            .get_document(id)
            .await
            .map_err(|e| format!("get {id}: {e}"))?;
        if record.status != DocumentStatus::Submitted || record.version != 1 {
            return Err(format!(
                "{id}: expected SUBMITTED v1, got {} v{}",
                record.status, record.version
            ));
        }
    }
    Ok(())
}

// ── Concurrent updates: final state consistent ──────────────────────────────

/// After a race on the same document the final state is exactly version 1 in
/// the target status, with one history entry from the winner.
async fn concurrent_updates_final_state_consistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let id = seed_document(storage.as_ref(), "DOC-P3").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = match s
                .update_document_status(
                    &mut snap,
                    id,
                    0,
                    DocumentStatus::Submitted,
                    OffsetDateTime::now_utc(),
                )
                .await
            {
                Ok(_) => {
                    s.insert_history_entry(&mut snap, make_history(id, DocumentAction::Submit))
                        .await
                }
                Err(e) => Err(e),
            };
            settle(s.as_ref(), snap, staged).await
        }));
    }
    count_winners(handles).await?;

    let record = storage
        .get_document(id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if record.version != 1 || record.status != DocumentStatus::Submitted {
        return Err(format!(
            "expected SUBMITTED v1 after race, got {} v{}",
            record.status, record.version
        ));
    }
    let history = storage.list_history(id).await.map_err(|e| e.to_string())?;
    if history.len() != 1 {
        return Err(format!("expected 1 history entry, got {}", history.len()));
    }
    Ok(())
}

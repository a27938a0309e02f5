use std::future::Future;

use time::OffsetDateTime;

use super::{advance, seed_document, TestResult};
use crate::{DocumentStatus, DocumentStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Basic version tracking
    results.push(TestResult::from_result(
        "version",
        "version_increments_sequentially",
        version_increments_sequentially(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_returns_correct_new_version",
        update_returns_correct_new_version(factory).await,
    ));

    // Wrong version fails
    results.push(TestResult::from_result(
        "version",
        "update_with_wrong_version_returns_conflict",
        update_with_wrong_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_has_correct_fields",
        conflict_has_correct_fields(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_does_not_change_state",
        conflict_does_not_change_state(factory).await,
    ));

    // Race conditions (sequential simulation)
    results.push(TestResult::from_result(
        "version",
        "two_snapshots_race_one_wins",
        two_snapshots_race_one_wins(factory).await,
    ));

    // Sequential within same snapshot
    results.push(TestResult::from_result(
        "version",
        "second_update_same_snapshot_uses_new_version",
        second_update_same_snapshot_uses_new_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "updated_at_is_written",
        updated_at_is_written(factory).await,
    ));

    results
}

// ── Basic version tracking ───────────────────────────────────────────────────

/// Two successive updates must yield versions 0 -> 1 -> 2.
async fn version_increments_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V1").await?;

    for (i, status) in [DocumentStatus::Submitted, DocumentStatus::Approved]
        .into_iter()
        .enumerate()
    {
        advance(&s, id, i as i64, status).await?;
        let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
        let expected_version = (i + 1) as i64;
        if rec.version != expected_version {
            return Err(format!(
                "after update {}, expected version {}, got {}",
                i + 1,
                expected_version,
                rec.version
            ));
        }
    }
    Ok(())
}

/// The return value of update_document_status must match the stored version.
async fn update_returns_correct_new_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V2").await?;
    let returned = advance(&s, id, 0, DocumentStatus::Submitted).await?;
    if returned != 1 {
        return Err(format!("update returned {returned}, expected 1"));
    }
    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.version != returned {
        return Err(format!(
            "stored version {} does not match returned version {}",
            rec.version, returned
        ));
    }
    Ok(())
}

// ── Wrong version fails ──────────────────────────────────────────────────────

/// Commit a single stale update, returning whatever error surfaced first
/// (from the update itself or from the commit).
async fn stale_update<S: DocumentStorage>(
    s: &S,
    id: crate::DocumentId,
    expected_version: i64,
) -> Result<(), StorageError> {
    let mut snap = s.begin_snapshot().await?;
    match s
        .update_document_status(
            &mut snap,
            id,
            expected_version,
            DocumentStatus::Submitted,
            OffsetDateTime::now_utc(),
        )
        .await
    {
        Ok(_) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

async fn update_with_wrong_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V3").await?;
    for wrong in [-1, 1, 5] {
        match stale_update(&s, id, wrong).await {
            Err(StorageError::ConcurrentConflict { .. }) => {}
            other => {
                return Err(format!(
                    "expected ConcurrentConflict for version {wrong}, got {other:?}"
                ))
            }
        }
    }
    Ok(())
}

async fn conflict_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V4").await?;
    match stale_update(&s, id, 7).await {
        Err(StorageError::ConcurrentConflict {
            document_id,
            expected_version,
        }) => {
            if document_id != id {
                return Err(format!("conflict document_id {document_id}, expected {id}"));
            }
            if expected_version != 7 {
                return Err(format!("conflict expected_version {expected_version}, expected 7"));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn conflict_does_not_change_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V5").await?;
    let _ = stale_update(&s, id, 3).await;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.status != DocumentStatus::Draft || rec.version != 0 {
        return Err(format!(
            "conflict mutated document: {} v{}",
            rec.status, rec.version
        ));
    }
    Ok(())
}

// ── Race conditions (sequential simulation) ──────────────────────────────────

/// Two snapshots both stage an update from version 0. The first commit wins;
/// the second must fail with ConcurrentConflict, either eagerly or at commit.
async fn two_snapshots_race_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V6").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let now = OffsetDateTime::now_utc();

    s.update_document_status(&mut first, id, 0, DocumentStatus::Submitted, now)
        .await
        .map_err(|e| format!("first update: {e}"))?;
    let staged = s
        .update_document_status(&mut second, id, 0, DocumentStatus::Submitted, now)
        .await;

    s.commit_snapshot(first)
        .await
        .map_err(|e| format!("first commit: {e}"))?;

    let loser = match staged {
        Ok(_) => s.commit_snapshot(second).await,
        Err(e) => {
            let _ = s.abort_snapshot(second).await;
            Err(e)
        }
    };
    match loser {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        other => return Err(format!("second snapshot: expected conflict, got {other:?}")),
    }

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.version != 1 {
        return Err(format!("expected version 1 after race, got {}", rec.version));
    }
    Ok(())
}

// ── Sequential within same snapshot ──────────────────────────────────────────

async fn second_update_same_snapshot_uses_new_version<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V7").await?;
    let now = OffsetDateTime::now_utc();

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v1 = s
        .update_document_status(&mut snap, id, 0, DocumentStatus::Submitted, now)
        .await
        .map_err(|e| format!("first update: {e}"))?;
    let v2 = s
        .update_document_status(&mut snap, id, v1, DocumentStatus::Approved, now)
        .await
        .map_err(|e| format!("second update: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if v2 != 2 || rec.version != 2 || rec.status != DocumentStatus::Approved {
        return Err(format!(
            "expected APPROVED v2, got {} v{} (returned {v2})",
            rec.status, rec.version
        ));
    }
    Ok(())
}

async fn updated_at_is_written<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-V8").await?;
    let created = s.get_document(id).await.map_err(|e| e.to_string())?;
    let later = created.updated_at + time::Duration::seconds(30);

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_document_status(&mut snap, id, 0, DocumentStatus::Submitted, later)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_document(id).await.map_err(|e| e.to_string())?;
    if rec.updated_at != later {
        return Err(format!("updated_at {} not written", rec.updated_at));
    }
    if rec.created_at != created.created_at {
        return Err("created_at changed on update".to_string());
    }
    Ok(())
}

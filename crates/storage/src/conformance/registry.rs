//! Registry uniqueness: the store itself must refuse a second registry entry
//! for a document, whatever the caller checked beforehand.

use std::future::Future;

use super::{make_registry, seed_document, TestResult};
use crate::{DocumentStorage, StorageError};

pub(super) async fn run_registry_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "registry",
        "registry_entry_committed",
        registry_entry_committed(factory).await,
    ));
    results.push(TestResult::from_result(
        "registry",
        "second_entry_after_commit_rejected",
        second_entry_after_commit_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "registry",
        "two_entries_same_snapshot_rejected",
        two_entries_same_snapshot_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "registry",
        "racing_snapshots_register_once",
        racing_snapshots_register_once(factory).await,
    ));

    results
}

async fn registry_entry_committed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-R1").await?;
    let entry = make_registry(id);
    let entry_id = entry.id;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_registry_entry(&mut snap, entry)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    match s.get_registry_entry(id).await.map_err(|e| e.to_string())? {
        Some(stored) if stored.id == entry_id => {}
        other => return Err(format!("expected committed entry {entry_id}, got {other:?}")),
    }
    let count = s.count_registry_entries(id).await.map_err(|e| e.to_string())?;
    if count != 1 {
        return Err(format!("expected 1 registry entry, got {count}"));
    }
    Ok(())
}

async fn second_entry_after_commit_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-R2").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_registry_entry(&mut snap, make_registry(id))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = match s.insert_registry_entry(&mut snap, make_registry(id)).await {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::DuplicateRegistryEntry { document_id }) if document_id == id => {}
        other => return Err(format!("expected DuplicateRegistryEntry, got {other:?}")),
    }
    let count = s.count_registry_entries(id).await.map_err(|e| e.to_string())?;
    if count != 1 {
        return Err(format!("expected 1 registry entry, got {count}"));
    }
    Ok(())
}

async fn two_entries_same_snapshot_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-R3").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_registry_entry(&mut snap, make_registry(id))
        .await
        .map_err(|e| e.to_string())?;
    let result = match s.insert_registry_entry(&mut snap, make_registry(id)).await {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match result {
        Err(StorageError::DuplicateRegistryEntry { .. }) => {}
        other => return Err(format!("expected DuplicateRegistryEntry, got {other:?}")),
    }
    let count = s.count_registry_entries(id).await.map_err(|e| e.to_string())?;
    if count != 0 {
        return Err(format!("rejected snapshot left {count} registry entries"));
    }
    Ok(())
}

/// Two snapshots both stage a registry insert before either commits. Only the
/// first commit may succeed, even though neither touched the document version.
async fn racing_snapshots_register_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let id = seed_document(&s, "DOC-R4").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_registry_entry(&mut first, make_registry(id))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    s.insert_registry_entry(&mut second, make_registry(id))
        .await
        .map_err(|e| format!("second insert: {e}"))?;

    s.commit_snapshot(first)
        .await
        .map_err(|e| format!("first commit: {e}"))?;
    match s.commit_snapshot(second).await {
        Err(StorageError::DuplicateRegistryEntry { .. }) => {}
        other => return Err(format!("second commit: expected duplicate, got {other:?}")),
    }
    let count = s.count_registry_entries(id).await.map_err(|e| e.to_string())?;
    if count != 1 {
        return Err(format!("expected 1 registry entry, got {count}"));
    }
    Ok(())
}

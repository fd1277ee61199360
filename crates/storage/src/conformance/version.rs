use std::future::Future;

use super::{key, make_revision, seed_node, TestResult, TS};
use crate::{FolioStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "advance_with_correct_version_succeeds",
        advance_with_correct_version_succeeds(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_version_returns_concurrent_conflict",
        stale_version_returns_concurrent_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_node_checks_version",
        update_node_checks_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "versions_are_dense",
        versions_are_dense(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "list_revisions_pages_ascending",
        list_revisions_pages_ascending(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "duplicate_revision_version_rejected",
        duplicate_revision_version_rejected(factory).await,
    ));

    results
}

/// Advance node-1 from `from` and insert the matching revision, committed.
async fn write_version<S: FolioStorage>(s: &S, from: i64) -> Result<i64, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v = s
        .advance_node_version(&mut snap, &key("node-1"), from, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_revision(&mut snap, make_revision("node-1", v, &format!("v{v}")))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(v)
}

async fn advance_with_correct_version_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;
    let v = write_version(&s, 1).await?;
    if v != 2 {
        return Err(format!("expected version 2, got {v}"));
    }
    Ok(())
}

async fn stale_version_returns_concurrent_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;
    write_version(&s, 1).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.advance_node_version(&mut snap, &key("node-1"), 1, TS).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 1,
            actual_version: 2,
            ..
        }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict 1/2, got {other:?}")),
    }
}

async fn update_node_checks_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_node(&mut snap, &key("node-1"), 7, true, None, TS)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 7,
            actual_version: 1,
            ..
        }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict 7/1, got {other:?}")),
    }
}

/// Every version from 1 to the head has exactly one revision.
async fn versions_are_dense<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut current = 0;
    for _ in 0..5 {
        current = write_version(&s, current).await?;
    }
    let revs = s
        .list_revisions(&key("node-1"), 0, 0)
        .await
        .map_err(|e| e.to_string())?;
    let versions: Vec<i64> = revs.iter().map(|r| r.version).collect();
    if versions != [1, 2, 3, 4, 5] {
        return Err(format!("expected dense 1..=5, got {versions:?}"));
    }
    Ok(())
}

async fn list_revisions_pages_ascending<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut current = 0;
    for _ in 0..5 {
        current = write_version(&s, current).await?;
    }
    let page = s
        .list_revisions(&key("node-1"), 2, 2)
        .await
        .map_err(|e| e.to_string())?;
    let versions: Vec<i64> = page.iter().map(|r| r.version).collect();
    if versions != [3, 4] {
        return Err(format!("expected page [3, 4], got {versions:?}"));
    }
    let rev = s
        .get_revision(&key("node-1"), 4)
        .await
        .map_err(|e| e.to_string())?;
    if rev.snapshot.as_deref() != Some("v4") {
        return Err(format!("expected content v4, got {:?}", rev.snapshot));
    }
    Ok(())
}

async fn duplicate_revision_version_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_revision(&mut snap, make_revision("node-1", 1, "again"))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DuplicateId { .. }) => Ok(()),
        other => Err(format!("expected DuplicateId, got {other:?}")),
    }
}

use std::future::Future;

use super::{key, make_patch, make_revision, seed_node, TestResult, TS};
use crate::{FolioStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_version_invisible",
        uncommitted_version_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_revision_invisible",
        uncommitted_revision_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "snapshot_reads_its_own_writes",
        snapshot_reads_its_own_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "aborted_writes_discarded",
        aborted_writes_discarded(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "locked_row_rejects_second_snapshot",
        locked_row_rejects_second_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_releases_locks",
        abort_releases_locks(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));

    results
}

// ── Isolation ────────────────────────────────────────────────────────────────

async fn uncommitted_version_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.advance_node_version(&mut snap, &key("node-1"), 1, TS)
        .await
        .map_err(|e| e.to_string())?;

    let head = s.get_node(&key("node-1")).await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if head.version != 1 {
        return Err(format!(
            "uncommitted advance leaked: visible version {}",
            head.version
        ));
    }
    Ok(())
}

async fn uncommitted_revision_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.advance_node_version(&mut snap, &key("node-1"), 0, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_revision(&mut snap, make_revision("node-1", 1, "draft"))
        .await
        .map_err(|e| e.to_string())?;

    let visible = s
        .list_revisions(&key("node-1"), 0, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if !visible.is_empty() {
        return Err(format!("expected no visible revisions, got {}", visible.len()));
    }
    Ok(())
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.advance_node_version(&mut snap, &key("node-1"), 0, TS)
        .await
        .map_err(|e| e.to_string())?;
    let head = s
        .get_node_for_update(&mut snap, &key("node-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_patch(&mut snap, make_patch("patch-1", "node-1"))
        .await
        .map_err(|e| e.to_string())?;
    let patch = s
        .get_patch_for_update(&mut snap, "patch-1")
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if head.version != 1 {
        return Err(format!("expected staged version 1, got {}", head.version));
    }
    if patch.id != "patch-1" {
        return Err(format!("expected staged patch-1, got {}", patch.id));
    }
    Ok(())
}

async fn aborted_writes_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.advance_node_version(&mut snap, &key("node-1"), 0, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_patch(&mut snap, make_patch("patch-1", "node-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_node(&key("node-1")).await.is_ok() {
        return Err("aborted node head is visible".to_string());
    }
    if s.get_patch("patch-1").await.is_ok() {
        return Err("aborted patch is visible".to_string());
    }
    Ok(())
}

// ── Locking ──────────────────────────────────────────────────────────────────

async fn locked_row_rejects_second_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.get_node_for_update(&mut first, &key("node-1"))
        .await
        .map_err(|e| e.to_string())?;

    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.advance_node_version(&mut second, &key("node-1"), 1, TS).await;
    let _ = s.abort_snapshot(second).await;
    let _ = s.abort_snapshot(first).await;
    match result {
        Err(StorageError::Locked { .. }) => Ok(()),
        other => Err(format!("expected Locked, got {other:?}")),
    }
}

async fn abort_releases_locks<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.get_node_for_update(&mut first, &key("node-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(first).await.map_err(|e| e.to_string())?;

    let mut second = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v = s
        .advance_node_version(&mut second, &key("node-1"), 1, TS)
        .await
        .map_err(|e| format!("lock not released: {e}"))?;
    s.commit_snapshot(second).await.map_err(|e| e.to_string())?;
    if v != 2 {
        return Err(format!("expected version 2, got {v}"));
    }
    Ok(())
}

async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.advance_node_version(&mut snap, &key("node-1"), 1, TS)
            .await
            .map_err(|e| e.to_string())?;
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let head = s
        .get_node_for_update(&mut snap, &key("node-1"))
        .await
        .map_err(|e| format!("lock survived drop: {e}"))?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if head.version != 1 {
        return Err(format!("dropped advance leaked: version {}", head.version));
    }
    Ok(())
}

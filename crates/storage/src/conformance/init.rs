use std::future::Future;

use super::{key, seed_node, TestResult, TS};
use crate::{FolioStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "advance_creates_node_at_version_1",
        advance_creates_node_at_version_1(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "advance_missing_node_with_nonzero_expected_conflicts",
        advance_missing_node_with_nonzero_expected_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "new_node_readable_via_get_node_for_update",
        new_node_readable_via_get_node_for_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "update_node_sets_deleted_and_keeps_version",
        update_node_sets_deleted_and_keeps_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "update_node_moves_parent",
        update_node_moves_parent(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "deleted_node_rejects_new_versions",
        deleted_node_rejects_new_versions(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "different_nodes_are_independent",
        different_nodes_are_independent(factory).await,
    ));

    results
}

// ── Test implementations ──────────────────────────────────────────────────────

/// The first advance from expected version 0 creates the head at version 1.
async fn advance_creates_node_at_version_1<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let head = s.get_node(&key("node-1")).await.map_err(|e| e.to_string())?;
    if head.version != 1 {
        return Err(format!("expected version 1, got {}", head.version));
    }
    if head.deleted {
        return Err("new node must not be deleted".to_string());
    }
    Ok(())
}

async fn advance_missing_node_with_nonzero_expected_conflicts<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.advance_node_version(&mut snap, &key("node-1"), 3, TS).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict {
            expected_version: 3,
            actual_version: 0,
            ..
        }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict 3/0, got {other:?}")),
    }
}

async fn new_node_readable_via_get_node_for_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let head = s
        .get_node_for_update(&mut snap, &key("node-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    if head.version != 1 || head.node_id != "node-1" {
        return Err(format!("unexpected head {head:?}"));
    }
    Ok(())
}

async fn update_node_sets_deleted_and_keeps_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_node(&mut snap, &key("node-1"), 1, true, None, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let head = s.get_node(&key("node-1")).await.map_err(|e| e.to_string())?;
    if !head.deleted {
        return Err("expected deleted = true".to_string());
    }
    if head.version != 1 {
        return Err(format!("version must stay 1, got {}", head.version));
    }
    Ok(())
}

async fn update_node_moves_parent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_node(
        &mut snap,
        &key("node-1"),
        1,
        false,
        Some("folder-9".to_string()),
        TS,
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let head = s.get_node(&key("node-1")).await.map_err(|e| e.to_string())?;
    if head.parent_id.as_deref() != Some("folder-9") {
        return Err(format!("expected parent folder-9, got {:?}", head.parent_id));
    }
    Ok(())
}

async fn deleted_node_rejects_new_versions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_node(&mut snap, &key("node-1"), 1, true, None, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.advance_node_version(&mut snap, &key("node-1"), 1, TS).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NodeNotFound { .. }) => Ok(()),
        other => Err(format!("expected NodeNotFound, got {other:?}")),
    }
}

async fn different_nodes_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-1").await?;
    seed_node(&s, "node-2").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.advance_node_version(&mut snap, &key("node-1"), 1, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let a = s.get_node(&key("node-1")).await.map_err(|e| e.to_string())?;
    let b = s.get_node(&key("node-2")).await.map_err(|e| e.to_string())?;
    if a.version != 2 || b.version != 1 {
        return Err(format!(
            "expected versions 2 and 1, got {} and {}",
            a.version, b.version
        ));
    }
    Ok(())
}

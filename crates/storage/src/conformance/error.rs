use std::future::Future;

use super::{key, TestResult};
use crate::{FolioStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_node_nonexistent",
        get_node_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_revision_nonexistent",
        get_revision_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_missing_records_report_their_ids",
        get_missing_records_report_their_ids(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_node_nonexistent",
        update_node_nonexistent(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "list_queries_empty_on_fresh_store",
        list_queries_empty_on_fresh_store(factory).await,
    ));

    results
}

// ── 1. get_node on empty store returns NodeNotFound ──────────────────────────

async fn get_node_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_node(&key("node-999")).await {
        Err(StorageError::NodeNotFound {
            project_id,
            node_id,
        }) if project_id == "proj-1" && node_id == "node-999" => Ok(()),
        other => Err(format!("expected NodeNotFound, got {other:?}")),
    }
}

// ── 2. get_revision on empty store returns RevisionNotFound ──────────────────

async fn get_revision_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_revision(&key("node-1"), 4).await {
        Err(StorageError::RevisionNotFound { version: 4, .. }) => Ok(()),
        other => Err(format!("expected RevisionNotFound v4, got {other:?}")),
    }
}

// ── 3. patch / log / batch / commit lookups carry the missing id ─────────────

async fn get_missing_records_report_their_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_patch("patch-x").await {
        Err(StorageError::PatchNotFound { patch_id }) if patch_id == "patch-x" => {}
        other => return Err(format!("expected PatchNotFound, got {other:?}")),
    }
    match s.get_operation_log("log-x").await {
        Err(StorageError::OperationLogNotFound { log_id }) if log_id == "log-x" => {}
        other => return Err(format!("expected OperationLogNotFound, got {other:?}")),
    }
    match s.get_batch_operation("batch-x").await {
        Err(StorageError::BatchNotFound { batch_id }) if batch_id == "batch-x" => {}
        other => return Err(format!("expected BatchNotFound, got {other:?}")),
    }
    match s.get_commit("commit-x").await {
        Err(StorageError::CommitNotFound { commit_id }) if commit_id == "commit-x" => Ok(()),
        other => Err(format!("expected CommitNotFound, got {other:?}")),
    }
}

// ── 4. update_node on a missing node returns NodeNotFound ────────────────────

async fn update_node_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_node(&mut snap, &key("node-1"), 1, true, None, super::TS)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NodeNotFound { .. }) => Ok(()),
        other => Err(format!("expected NodeNotFound, got {other:?}")),
    }
}

// ── 5. list queries return empty vectors, not errors ─────────────────────────

async fn list_queries_empty_on_fresh_store<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let revs = s
        .list_revisions(&key("node-1"), 0, 0)
        .await
        .map_err(|e| e.to_string())?;
    let commits = s
        .list_commits("proj-1", None, 0, 0)
        .await
        .map_err(|e| e.to_string())?;
    let patches = s
        .list_patches("proj-1", None, None)
        .await
        .map_err(|e| e.to_string())?;
    let logs = s
        .list_operation_logs("proj-1", 0)
        .await
        .map_err(|e| e.to_string())?;
    let batches = s
        .list_batch_operations("proj-1", None, 0)
        .await
        .map_err(|e| e.to_string())?;
    let found = s
        .find_batch_by_client_request("proj-1", "req-1")
        .await
        .map_err(|e| e.to_string())?;
    if !revs.is_empty()
        || !commits.is_empty()
        || !patches.is_empty()
        || !logs.is_empty()
        || !batches.is_empty()
        || found.is_some()
    {
        return Err("expected every list query to be empty".to_string());
    }
    Ok(())
}

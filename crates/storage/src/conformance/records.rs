use std::future::Future;

use super::{make_batch, make_log, make_patch, TestResult, TS};
use crate::record::{BatchStatus, LogStatus, PatchStatus};
use crate::{FolioStorage, StorageError};

pub(super) async fn run_record_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "records",
        "patch_status_guarded_update",
        patch_status_guarded_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "records",
        "list_patches_filters_by_node_and_status",
        list_patches_filters_by_node_and_status(factory).await,
    ));
    results.push(TestResult::from_result(
        "records",
        "operation_log_status_guarded_update",
        operation_log_status_guarded_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "records",
        "chain_entries_listed_oldest_first",
        chain_entries_listed_oldest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "records",
        "batch_status_guarded_update",
        batch_status_guarded_update(factory).await,
    ));
    results.push(TestResult::from_result(
        "records",
        "duplicate_client_request_names_existing_batch",
        duplicate_client_request_names_existing_batch(factory).await,
    ));

    results
}

// ── Patches ──────────────────────────────────────────────────────────────────

async fn patch_status_guarded_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_patch(&mut snap, make_patch("patch-1", "node-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut approved = s.get_patch("patch-1").await.map_err(|e| e.to_string())?;
    approved.status = PatchStatus::Approved;
    approved.reviewed_by = Some("reviewer".to_string());

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_patch(&mut snap, approved.clone(), PatchStatus::Pending)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_patch(&mut snap, approved, PatchStatus::Pending)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::PatchStatusMismatch {
            expected: PatchStatus::Pending,
            found: PatchStatus::Approved,
            ..
        }) => {}
        other => return Err(format!("expected PatchStatusMismatch, got {other:?}")),
    }

    let stored = s.get_patch("patch-1").await.map_err(|e| e.to_string())?;
    if stored.reviewed_by.as_deref() != Some("reviewer") {
        return Err(format!("reviewer not persisted: {:?}", stored.reviewed_by));
    }
    Ok(())
}

async fn list_patches_filters_by_node_and_status<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_patch(&mut snap, make_patch("patch-1", "node-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_patch(&mut snap, make_patch("patch-2", "node-2"))
        .await
        .map_err(|e| e.to_string())?;
    let mut rejected = make_patch("patch-3", "node-1");
    rejected.status = PatchStatus::Rejected;
    s.insert_patch(&mut snap, rejected)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let node1 = s
        .list_patches("proj-1", Some("node-1"), None)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = node1.iter().map(|p| p.id.as_str()).collect();
    if ids != ["patch-3", "patch-1"] {
        return Err(format!("expected [patch-3, patch-1], got {ids:?}"));
    }
    let pending = s
        .list_patches("proj-1", None, Some(PatchStatus::Pending))
        .await
        .map_err(|e| e.to_string())?;
    if pending.len() != 2 {
        return Err(format!("expected 2 pending patches, got {}", pending.len()));
    }
    Ok(())
}

// ── Operation logs ───────────────────────────────────────────────────────────

async fn operation_log_status_guarded_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_operation_log(&mut snap, make_log("log-1", "chain-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut undone = s
        .get_operation_log("log-1")
        .await
        .map_err(|e| e.to_string())?;
    undone.status = LogStatus::Undone;
    undone.undone_at = Some(TS.to_string());

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_operation_log(&mut snap, undone.clone(), LogStatus::Executed)
        .await
        .map_err(|e| e.to_string())?;
    let again = s
        .update_operation_log(&mut snap, undone, LogStatus::Executed)
        .await;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    match again {
        Err(StorageError::LogStatusMismatch {
            found: LogStatus::Undone,
            ..
        }) => Ok(()),
        other => Err(format!("expected LogStatusMismatch, got {other:?}")),
    }
}

async fn chain_entries_listed_oldest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for (id, chain) in [("log-1", "chain-a"), ("log-2", "chain-b"), ("log-3", "chain-a")] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.insert_operation_log(&mut snap, make_log(id, chain))
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    let chain = s
        .list_operation_logs_by_chain("chain-a")
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = chain.iter().map(|l| l.id.as_str()).collect();
    if ids != ["log-1", "log-3"] {
        return Err(format!("expected [log-1, log-3], got {ids:?}"));
    }
    let recent = s
        .list_operation_logs("proj-1", 2)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = recent.iter().map(|l| l.id.as_str()).collect();
    if ids != ["log-3", "log-2"] {
        return Err(format!("expected [log-3, log-2], got {ids:?}"));
    }
    Ok(())
}

// ── Batches ──────────────────────────────────────────────────────────────────

async fn batch_status_guarded_update<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_batch_operation(&mut snap, make_batch("batch-1", None))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut running = s
        .get_batch_operation("batch-1")
        .await
        .map_err(|e| e.to_string())?;
    running.status = BatchStatus::Running;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_batch_operation(&mut snap, running.clone(), BatchStatus::Pending)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_batch_operation(&mut snap, running, BatchStatus::Pending)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::BatchStatusMismatch {
            found: BatchStatus::Running,
            ..
        }) => {}
        other => return Err(format!("expected BatchStatusMismatch, got {other:?}")),
    }

    let listed = s
        .list_batch_operations("proj-1", Some(BatchStatus::Running), 0)
        .await
        .map_err(|e| e.to_string())?;
    if listed.len() != 1 {
        return Err(format!("expected 1 running batch, got {}", listed.len()));
    }
    Ok(())
}

async fn duplicate_client_request_names_existing_batch<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_batch_operation(&mut snap, make_batch("batch-1", Some("req-1")))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let found = s
        .find_batch_by_client_request("proj-1", "req-1")
        .await
        .map_err(|e| e.to_string())?;
    if found.map(|b| b.id).as_deref() != Some("batch-1") {
        return Err("client request lookup did not find batch-1".to_string());
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_batch_operation(&mut snap, make_batch("batch-2", Some("req-1")))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DuplicateClientRequest {
            existing_batch_id, ..
        }) if existing_batch_id == "batch-1" => Ok(()),
        other => Err(format!("expected DuplicateClientRequest, got {other:?}")),
    }
}

//! End-to-end flows through the `Engine` facade on in-memory storage.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{engine, engine_with, key, seed, PROJECT};
use folio_engine::{
    BatchRequest, CommitFile, CommitRequest, ConflictResolution, EngineConfig, EngineError,
    LogEntry, NewRevision, OperationLogChain, PatchProposal, ResolutionStrategy, ReviewDecision,
};
use folio_storage::{
    BatchOperationType, BatchStatus, CommandType, DiffFormat, FolioStorage, ItemStatus, LogStatus,
    MemoryStorage, PatchStatus,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn proposal(node_id: &str, base_version: i64, content: &str) -> PatchProposal {
    PatchProposal {
        project_id: PROJECT.to_string(),
        node_id: node_id.to_string(),
        base_version,
        diff_format: DiffFormat::Full,
        diff_payload: content.to_string(),
        created_by: "bot".to_string(),
        preview: None,
        metadata: json!({}),
    }
}

fn file(node_id: &str, content: &str, expected_version: i64) -> CommitFile {
    CommitFile {
        node_id: node_id.to_string(),
        content: content.to_string(),
        expected_version,
    }
}

fn commit_request(files: Vec<CommitFile>) -> CommitRequest {
    CommitRequest {
        project_id: PROJECT.to_string(),
        author_id: "alice".to_string(),
        message: Some("update".to_string()),
        files,
        metadata: json!({}),
    }
}

fn delete_batch(targets: &[String], atomic: bool) -> BatchRequest {
    BatchRequest {
        project_id: PROJECT.to_string(),
        operation_type: BatchOperationType::Delete,
        target_ids: targets.to_vec(),
        atomic,
        created_by: "alice".to_string(),
        client_request_id: None,
        payload: json!({}),
    }
}

// ── Patches ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn patch_on_current_base_applies() {
    let (_, engine) = engine();
    let doc = seed(&engine, "doc", 3).await;

    let patch = engine
        .patches()
        .propose(proposal("doc", 3, "rewritten\n"))
        .await
        .unwrap();
    engine
        .patches()
        .review(&patch.id, ReviewDecision::Approve, "reviewer")
        .await
        .unwrap();
    let rev = engine.patches().apply(&patch.id, "bot").await.unwrap();

    assert_eq!(rev.version, 4);
    assert_eq!(engine.versions().current_version(&doc).await.unwrap(), 4);
    let stored = engine.patches().get(&patch.id).await.unwrap();
    assert_eq!(stored.status, PatchStatus::Applied);
    assert_eq!(stored.applied_version, Some(4));
}

#[tokio::test]
async fn patch_on_stale_base_conflicts() {
    let (_, engine) = engine();
    let doc = seed(&engine, "doc", 5).await;

    let patch = engine
        .patches()
        .propose(proposal("doc", 3, "late\n"))
        .await
        .unwrap();
    engine
        .patches()
        .review(&patch.id, ReviewDecision::Approve, "reviewer")
        .await
        .unwrap();
    let err = engine.patches().apply(&patch.id, "bot").await.unwrap_err();

    match err {
        EngineError::VersionConflict(info) => {
            assert_eq!(info.current_version, 5);
            assert_eq!(info.expected_version, 3);
            let since: Vec<i64> = info.revisions_since.iter().map(|r| r.version).collect();
            assert_eq!(since, [4, 5]);
        }
        other => panic!("expected VersionConflict, got {other:?}"),
    }
    assert_eq!(engine.versions().current_version(&doc).await.unwrap(), 5);
    assert_eq!(
        engine.patches().get(&patch.id).await.unwrap().status,
        PatchStatus::Approved
    );
}

// ── Commits ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn stale_file_fails_whole_commit() {
    let (storage, engine) = engine();
    let a = seed(&engine, "a", 1).await;
    let b = seed(&engine, "b", 2).await;

    // Another writer raises b to v3 first.
    engine
        .commits()
        .commit(
            &commit_request(vec![file("b", "theirs\n", 2)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let err = engine
        .commits()
        .commit(
            &commit_request(vec![file("a", "mine\n", 1), file("b", "mine\n", 2)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(result) => {
            let nodes: Vec<&str> = result
                .conflicting_nodes()
                .map(|c| c.node_id.as_str())
                .collect();
            assert_eq!(nodes, ["b"]);
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
    assert_eq!(engine.versions().current_version(&a).await.unwrap(), 1);
    assert_eq!(engine.versions().current_version(&b).await.unwrap(), 3);
    assert_eq!(
        engine.commits().list_commits(PROJECT, None, 0, 0).await.unwrap().len(),
        1
    );
    assert_eq!(storage.held_lock_count(), 0);
}

#[tokio::test]
async fn commit_racing_an_uncommitted_writer_conflicts() {
    let (storage, engine) = engine();
    let a = seed(&engine, "a", 1).await;
    let b = seed(&engine, "b", 2).await;

    // The other writer has raised b but not committed, so the up-front
    // check still reads v2 and only the write phase sees the race.
    let mut theirs = storage.begin_snapshot().await.unwrap();
    storage
        .advance_node_version(&mut theirs, &b, 2, "2026-01-01T00:00:00Z")
        .await
        .unwrap();

    let err = engine
        .commits()
        .commit(
            &commit_request(vec![file("a", "mine\n", 1), file("b", "mine\n", 2)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    match err {
        EngineError::Conflict(result) => {
            assert!(result.has_conflicts);
            assert!(result.conflicts["b"].has_conflict);
            assert!(!result.conflicts["a"].has_conflict);
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
    assert_eq!(engine.versions().current_version(&a).await.unwrap(), 1);
    assert!(engine
        .commits()
        .list_commits(PROJECT, None, 0, 0)
        .await
        .unwrap()
        .is_empty());

    storage.commit_snapshot(theirs).await.unwrap();
    assert_eq!(storage.get_node(&b).await.unwrap().version, 3);
    assert_eq!(storage.held_lock_count(), 0);
}

#[tokio::test]
async fn commit_writes_all_files_with_shared_commit_id() {
    let (_, engine) = engine();
    seed(&engine, "a", 1).await;

    let outcome = engine
        .commits()
        .commit(
            &commit_request(vec![file("a", "a2\n", 1), file("new", "fresh\n", 0)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.commit.file_count, 2);
    let versions: Vec<i64> = outcome.revisions.iter().map(|r| r.version).collect();
    assert_eq!(versions, [2, 1]);
    assert!(outcome
        .revisions
        .iter()
        .all(|r| r.commit_id.as_deref() == Some(outcome.commit.id.as_str())));

    let (commit, revisions) = engine
        .commits()
        .get_commit(PROJECT, &outcome.commit.id)
        .await
        .unwrap();
    assert_eq!(commit, outcome.commit);
    assert_eq!(revisions.len(), 2);
}

#[tokio::test]
async fn commit_with_resolution_merges_disjoint_edit() {
    let (_, engine) = engine();
    let doc = key("doc");
    engine
        .versions()
        .create_revision(
            &doc,
            NewRevision::new("seed", "one\ntwo\nthree\n"),
        )
        .await
        .unwrap();
    engine
        .versions()
        .create_revision(
            &doc,
            NewRevision::new("bob", "one\ntwo\nTHREE\n"),
        )
        .await
        .unwrap();

    let request = commit_request(vec![file("doc", "ONE\ntwo\nthree\n", 1)]);
    let mut resolutions = BTreeMap::new();
    resolutions.insert(
        "doc".to_string(),
        ConflictResolution {
            strategy: ResolutionStrategy::Auto,
            resolved_by: "alice".to_string(),
            note: None,
            content: "ONE\ntwo\nthree\n".to_string(),
            base_version: 1,
        },
    );
    let outcome = engine
        .commits()
        .commit_with_resolutions(&request, &resolutions, &CancellationToken::new())
        .await
        .unwrap();
    let rev = &outcome.revisions[0];
    assert_eq!(rev.version, 3);
    assert_eq!(
        engine.versions().read_content(rev).await.unwrap(),
        "ONE\ntwo\nTHREE\n"
    );
}

// ── Batches ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_atomic_batch_isolates_one_missing_target() {
    let (_, engine) = engine();
    let mut targets = Vec::new();
    for i in 1..=10 {
        let id = format!("n{i}");
        seed(&engine, &id, 1).await;
        targets.push(id);
    }
    let batch = engine
        .batches()
        .submit(delete_batch(&targets, false))
        .await
        .unwrap();

    // Target 4 disappears between submission and execution.
    engine
        .batches()
        .execute(
            &engine
                .batches()
                .submit(delete_batch(&["n4".to_string()], true))
                .await
                .unwrap()
                .id,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let run = engine
        .batches()
        .execute(&batch.id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(run.batch.status, BatchStatus::Completed);
    assert_eq!(run.succeeded + run.skipped, 9);
    assert_eq!(run.failed, 1);

    let failed: Vec<_> = run
        .batch
        .items
        .iter()
        .filter(|i| i.status == ItemStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target_id, "n4");
    assert_eq!(failed[0].error_code.as_deref(), Some("NOT_FOUND"));
    assert!(!failed[0].retryable);
    assert_eq!(failed[0].retry_count, 0);
}

#[tokio::test]
async fn resubmitted_request_returns_first_batch() {
    let (_, engine) = engine();
    seed(&engine, "a", 1).await;
    let mut request = delete_batch(&["a".to_string()], false);
    request.client_request_id = Some("client-42".to_string());

    let first = engine.batches().submit(request.clone()).await.unwrap();
    engine
        .batches()
        .execute(&first.id, &CancellationToken::new())
        .await
        .unwrap();
    let again = engine.batches().submit(request).await.unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(again.status, BatchStatus::Completed);
}

#[tokio::test]
async fn undo_chain_restores_deleted_nodes_once() {
    let (storage, engine) = engine();
    let targets: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    for t in &targets {
        seed(&engine, t, 1).await;
    }
    let batch = engine
        .batches()
        .submit(delete_batch(&targets, true))
        .await
        .unwrap();
    engine
        .batches()
        .execute(&batch.id, &CancellationToken::new())
        .await
        .unwrap();
    for t in &targets {
        assert!(storage.get_node(&key(t)).await.unwrap().deleted);
    }

    let undone = engine.batches().undo_chain(&batch.chain_id).await.unwrap();
    let order: Vec<&str> = undone.iter().map(|l| l.target_ids[0].as_str()).collect();
    assert_eq!(order, ["c", "b", "a"]);
    for t in &targets {
        assert!(!storage.get_node(&key(t)).await.unwrap().deleted);
    }
    assert!(engine
        .logs()
        .by_chain(&batch.chain_id)
        .await
        .unwrap()
        .iter()
        .all(|l| l.status == LogStatus::Undone && l.is_committed));

    assert!(engine
        .batches()
        .undo_chain(&batch.chain_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn undo_chain_reverts_recorded_edits() {
    let (_, engine) = engine();
    let doc = seed(&engine, "doc", 2).await;
    let chain_id = OperationLogChain::<MemoryStorage>::new_chain_id();
    engine
        .logs()
        .record(LogEntry {
            project_id: PROJECT.to_string(),
            actor_id: "alice".to_string(),
            chain_id: chain_id.clone(),
            command_type: CommandType::Edit,
            target_ids: vec!["doc".to_string()],
            payload: json!({ "previous_version": 1 }),
        })
        .await
        .unwrap();

    let undone = engine.batches().undo_chain(&chain_id).await.unwrap();
    assert_eq!(undone.len(), 1);
    assert_eq!(engine.versions().current_version(&doc).await.unwrap(), 3);
    assert_eq!(engine.versions().content_at(&doc, 3).await.unwrap(), "doc v1\n");
}

#[tokio::test]
async fn cancellation_mid_batch_keeps_finished_items() {
    let (storage, engine) = engine_with(EngineConfig {
        retry_delay_ms: 60_000,
        ..EngineConfig::default()
    });
    let targets: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    for t in &targets {
        seed(&engine, t, 1).await;
    }
    let batch = engine
        .batches()
        .submit(delete_batch(&targets, false))
        .await
        .unwrap();

    // Hold b's lock so its first attempt fails with NODE_LOCKED, then cancel
    // while the executor waits to retry.
    let mut blocker = storage.begin_snapshot().await.unwrap();
    storage
        .get_node_for_update(&mut blocker, &key("b"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let batches = engine.batches().clone();
    let batch_id = batch.id.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let in_flight = batches.get(&batch_id).await.unwrap();
        trigger.cancel();
        in_flight
    });

    let run = engine.batches().execute(&batch.id, &cancel).await.unwrap();
    let in_flight = handle.await.unwrap();
    assert_eq!(in_flight.status, BatchStatus::Running);
    assert_eq!(in_flight.items[0].status, ItemStatus::Succeeded);
    assert_eq!(in_flight.items[1].status, ItemStatus::Processing);
    assert_eq!(in_flight.items[2].status, ItemStatus::Pending);
    storage.abort_snapshot(blocker).await.unwrap();

    assert!(run.cancelled);
    assert_eq!(run.batch.items[0].status, ItemStatus::Succeeded);
    assert_eq!(run.batch.items[1].status, ItemStatus::Skipped);
    assert_eq!(run.batch.items[1].retry_count, 1);
    assert_eq!(run.batch.items[2].status, ItemStatus::Skipped);
    assert_eq!(run.batch.items[2].error_code.as_deref(), Some("CANCELLED"));
    assert!(storage.get_node(&key("a")).await.unwrap().deleted);
    assert!(!storage.get_node(&key("c")).await.unwrap().deleted);
}

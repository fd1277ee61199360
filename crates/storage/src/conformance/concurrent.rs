use std::future::Future;
use std::sync::Arc;

use super::{key, make_revision, seed_node, TestResult, TS};
use crate::{FolioStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_advances_exactly_one_wins",
        concurrent_advances_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_advances_different_nodes_all_succeed",
        concurrent_advances_different_nodes_all_succeed(factory).await,
    ));

    results
}

// ── Concurrent advance: exactly one wins ────────────────────────────────────

/// N tasks each open a snapshot and attempt to advance the same node from
/// version 1. Exactly one commit succeeds. Losers see either the lock held by
/// the winner or the winner's committed version.
async fn concurrent_advances_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_node(storage.as_ref(), "node-1").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let result = s.advance_node_version(&mut snap, &key("node-1"), 1, TS).await;
            match result {
                Ok(v) => {
                    s.insert_revision(&mut snap, make_revision("node-1", v, "winner"))
                        .await?;
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) | Err(StorageError::Locked { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let head = storage
        .get_node(&key("node-1"))
        .await
        .map_err(|e| e.to_string())?;
    if head.version != 2 {
        return Err(format!("expected final version 2, got {}", head.version));
    }
    Ok(())
}

// ── Concurrent advances on different nodes: all succeed ─────────────────────

async fn concurrent_advances_different_nodes_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let node_id = format!("node-{i}");
            let mut snap = s.begin_snapshot().await?;
            let v = s.advance_node_version(&mut snap, &key(&node_id), 0, TS).await?;
            s.insert_revision(&mut snap, make_revision(&node_id, v, "content"))
                .await?;
            s.commit_snapshot(snap).await
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("unexpected conflict on independent node: {e}"))?;
    }
    for i in 0..N {
        let head = storage
            .get_node(&key(&format!("node-{i}")))
            .await
            .map_err(|e| e.to_string())?;
        if head.version != 1 {
            return Err(format!("node-{i}: expected version 1, got {}", head.version));
        }
    }
    Ok(())
}

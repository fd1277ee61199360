use std::future::Future;

use super::{key, make_commit, make_log, make_revision, seed_node, TestResult, TS};
use crate::FolioStorage;

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "multi_node_commit_visible_together",
        multi_node_commit_visible_together(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "revisions_listed_by_commit_in_node_order",
        revisions_listed_by_commit_in_node_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "failed_step_aborts_whole_snapshot",
        failed_step_aborts_whole_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "list_commits_newest_first_with_filters",
        list_commits_newest_first_with_filters(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "duplicate_commit_id_rejected",
        duplicate_commit_id_rejected(factory).await,
    ));

    results
}

async fn write_commit<S: FolioStorage>(
    s: &S,
    commit_id: &str,
    author_id: &str,
    nodes: &[(&str, i64)],
) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_commit(&mut snap, make_commit(commit_id, author_id, nodes.len()))
        .await
        .map_err(|e| e.to_string())?;
    for (node_id, expected) in nodes {
        let v = s
            .advance_node_version(&mut snap, &key(node_id), *expected, TS)
            .await
            .map_err(|e| e.to_string())?;
        let mut rev = make_revision(node_id, v, "content");
        rev.commit_id = Some(commit_id.to_string());
        s.insert_revision(&mut snap, rev)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn multi_node_commit_visible_together<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    write_commit(&s, "commit-1", "author-1", &[("node-a", 0), ("node-b", 0)]).await?;

    for node in ["node-a", "node-b"] {
        let head = s.get_node(&key(node)).await.map_err(|e| e.to_string())?;
        if head.version != 1 {
            return Err(format!("{node}: expected version 1, got {}", head.version));
        }
    }
    let commit = s.get_commit("commit-1").await.map_err(|e| e.to_string())?;
    if commit.file_count != 2 {
        return Err(format!("expected file_count 2, got {}", commit.file_count));
    }
    Ok(())
}

async fn revisions_listed_by_commit_in_node_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    write_commit(&s, "commit-1", "author-1", &[("node-c", 0), ("node-a", 0)]).await?;

    let revs = s
        .list_revisions_by_commit("commit-1")
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = revs.iter().map(|r| r.node_id.as_str()).collect();
    if ids != ["node-a", "node-c"] {
        return Err(format!("expected [node-a, node-c], got {ids:?}"));
    }
    Ok(())
}

/// A snapshot that hits an OCC failure halfway is aborted and nothing from it
/// is visible, including the log entry and commit written before the failure.
async fn failed_step_aborts_whole_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_node(&s, "node-b").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_commit(&mut snap, make_commit("commit-1", "author-1", 2))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_operation_log(&mut snap, make_log("log-1", "chain-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.advance_node_version(&mut snap, &key("node-a"), 0, TS)
        .await
        .map_err(|e| e.to_string())?;
    // node-b is at version 1, so expecting 0 must fail.
    if s
        .advance_node_version(&mut snap, &key("node-b"), 0, TS)
        .await
        .is_ok()
    {
        return Err("stale advance on node-b succeeded".to_string());
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_node(&key("node-a")).await.is_ok() {
        return Err("node-a leaked from aborted snapshot".to_string());
    }
    if s.get_commit("commit-1").await.is_ok() {
        return Err("commit leaked from aborted snapshot".to_string());
    }
    if s.get_operation_log("log-1").await.is_ok() {
        return Err("log entry leaked from aborted snapshot".to_string());
    }
    Ok(())
}

async fn list_commits_newest_first_with_filters<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    write_commit(&s, "commit-1", "alice", &[("node-a", 0)]).await?;
    write_commit(&s, "commit-2", "bob", &[("node-a", 1)]).await?;
    write_commit(&s, "commit-3", "alice", &[("node-a", 2)]).await?;

    let all = s
        .list_commits("proj-1", None, 0, 0)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
    if ids != ["commit-3", "commit-2", "commit-1"] {
        return Err(format!("unexpected order {ids:?}"));
    }

    let alice = s
        .list_commits("proj-1", Some("alice"), 1, 1)
        .await
        .map_err(|e| e.to_string())?;
    if alice.len() != 1 || alice[0].id != "commit-1" {
        return Err(format!("author filter with paging returned {alice:?}"));
    }
    Ok(())
}

async fn duplicate_commit_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    write_commit(&s, "commit-1", "author-1", &[("node-a", 0)]).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_commit(&mut snap, make_commit("commit-1", "author-1", 1))
        .await;
    let _ = s.abort_snapshot(snap).await;
    if result.is_ok() {
        return Err("duplicate commit id accepted".to_string());
    }
    Ok(())
}

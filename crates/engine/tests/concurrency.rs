//! Racing writers on a multi-threaded runtime.

mod common;

use std::sync::Arc;

use common::{engine, seed, PROJECT};
use folio_engine::{CommitFile, CommitRequest, EngineError, NewRevision};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const WRITERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_revisions_never_share_a_version() {
    let (_, engine) = engine();
    let doc = seed(&engine, "doc", 1).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let engine = Arc::clone(&engine);
        let doc = doc.clone();
        handles.push(tokio::spawn(async move {
            engine
                .versions()
                .create_revision(&doc, NewRevision::new(format!("w{i}"), format!("w{i}\n")))
                .await
        }));
    }

    let mut written = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(rev) => written.push(rev.version),
            Err(e) => assert!(e.is_retryable(), "unexpected error: {e}"),
        }
    }
    written.sort_unstable();
    let expected: Vec<i64> = (2..2 + written.len() as i64).collect();
    assert_eq!(written, expected);

    let history = engine
        .versions()
        .history(&doc, ..)
        .collect_remaining()
        .await
        .unwrap();
    for pair in history.windows(2) {
        assert_eq!(pair[1].version, pair[0].version + 1);
        assert_eq!(pair[1].parent_version, pair[0].version);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_commits_have_exactly_one_winner() {
    let (storage, engine) = engine();
    let a = seed(&engine, "a", 1).await;
    let b = seed(&engine, "b", 2).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mut files = vec![
                CommitFile {
                    node_id: "a".to_string(),
                    content: format!("a from w{i}\n"),
                    expected_version: 1,
                },
                CommitFile {
                    node_id: "b".to_string(),
                    content: format!("b from w{i}\n"),
                    expected_version: 2,
                },
            ];
            // Half the writers list the shared nodes in the opposite order.
            if i % 2 == 1 {
                files.reverse();
            }
            let request = CommitRequest {
                project_id: PROJECT.to_string(),
                author_id: format!("w{i}"),
                message: None,
                files,
                metadata: json!({}),
            };
            engine
                .commits()
                .commit(&request, &CancellationToken::new())
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::Conflict(result)) => assert!(result.has_conflicts),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);

    let va = engine.versions().current_version(&a).await.unwrap();
    let vb = engine.versions().current_version(&b).await.unwrap();
    assert_eq!((va, vb), (2, 3));
    assert_eq!(
        engine
            .commits()
            .list_commits(PROJECT, None, 0, 0)
            .await
            .unwrap()
            .len(),
        winners
    );
    assert_eq!(storage.held_lock_count(), 0);
}

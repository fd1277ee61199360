//! Behavioural checks every `FolioStorage` backend must pass.
//!
//! Each check gets a fresh backend from a factory and exercises one contract:
//!
//! - **Node heads**: creation at version 1, deleted flag, parent moves
//! - **Snapshots**: uncommitted writes stay invisible, abort releases locks
//! - **Atomic commit**: several records land together or not at all
//! - **OCC**: stale `expected_version` updates are rejected
//! - **Records**: patch, log and batch status guards, idempotency keys
//! - **Errors**: missing rows map to `NotFound`
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use folio_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod error;
mod init;
mod records;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::{
    BatchOperation, BatchOperationItem, BatchOperationType, BatchStatus, CommandType, Commit,
    DiffFormat, FilePatch, FileRevision, ItemStatus, LogStatus, NodeKey, OperationLog,
    PatchStatus, PreflightSummary,
};
use crate::FolioStorage;

const TS: &str = "2025-01-01T00:00:00Z";

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "advance_creates_node_at_version_1").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Pass/fail tally for one suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run every check against backends produced by `factory`.
///
/// `factory` is called once per check and must return an empty backend.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: FolioStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(records::run_record_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn key(node_id: &str) -> NodeKey {
    NodeKey::new("proj-1", node_id)
}

fn make_revision(node_id: &str, version: i64, content: &str) -> FileRevision {
    FileRevision {
        id: format!("rev-{node_id}-{version}"),
        project_id: "proj-1".to_string(),
        node_id: node_id.to_string(),
        version,
        parent_version: version - 1,
        author_id: "author-1".to_string(),
        message: None,
        snapshot: Some(content.to_string()),
        storage_ref: None,
        compressed: false,
        content_hash: format!("hash-{version}"),
        commit_id: None,
        created_at: TS.to_string(),
        metadata: serde_json::json!({}),
    }
}

fn make_commit(id: &str, author_id: &str, file_count: usize) -> Commit {
    Commit {
        id: id.to_string(),
        project_id: "proj-1".to_string(),
        author_id: author_id.to_string(),
        message: Some("test commit".to_string()),
        file_count,
        metadata: serde_json::json!({}),
        created_at: TS.to_string(),
    }
}

fn make_patch(id: &str, node_id: &str) -> FilePatch {
    FilePatch {
        id: id.to_string(),
        project_id: "proj-1".to_string(),
        node_id: node_id.to_string(),
        base_version: 1,
        diff_format: DiffFormat::Full,
        diff_payload: "patched".to_string(),
        created_by: "author-1".to_string(),
        status: PatchStatus::Pending,
        preview: None,
        reviewed_by: None,
        applied_version: None,
        metadata: serde_json::json!({}),
        created_at: TS.to_string(),
        updated_at: TS.to_string(),
    }
}

fn make_log(id: &str, chain_id: &str) -> OperationLog {
    OperationLog {
        id: id.to_string(),
        project_id: "proj-1".to_string(),
        actor_id: "author-1".to_string(),
        chain_id: chain_id.to_string(),
        command_type: CommandType::Delete,
        target_ids: vec!["node-1".to_string()],
        payload: serde_json::json!({}),
        status: LogStatus::Executed,
        is_committed: true,
        started_at: TS.to_string(),
        undone_at: None,
    }
}

fn make_batch(id: &str, client_request_id: Option<&str>) -> BatchOperation {
    BatchOperation {
        id: id.to_string(),
        project_id: "proj-1".to_string(),
        operation_type: BatchOperationType::Delete,
        target_ids: vec!["node-1".to_string()],
        atomic: false,
        created_by: "author-1".to_string(),
        client_request_id: client_request_id.map(str::to_string),
        chain_id: format!("chain-{id}"),
        payload: serde_json::json!({}),
        status: BatchStatus::Pending,
        items: vec![BatchOperationItem {
            batch_id: id.to_string(),
            target_id: "node-1".to_string(),
            expected_version: Some(1),
            status: ItemStatus::Pending,
            error_code: None,
            error_message: None,
            retryable: false,
            retry_count: 0,
        }],
        preflight: PreflightSummary {
            total_count: 1,
            valid_count: 1,
            invalid_count: 0,
            errors: Vec::new(),
        },
        error_code: None,
        error_message: None,
        created_at: TS.to_string(),
        started_at: None,
        finished_at: None,
    }
}

/// Create `node_id` at version 1 with a matching revision, committed.
async fn seed_node<S: FolioStorage>(s: &S, node_id: &str) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v = s
        .advance_node_version(&mut snap, &key(node_id), 0, TS)
        .await
        .map_err(|e| e.to_string())?;
    s.insert_revision(&mut snap, make_revision(node_id, v, "v1"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

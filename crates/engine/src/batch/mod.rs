//! Bulk delete/move over many nodes.
//!
//! A batch is submitted (validated, preflighted, persisted as `pending`) and
//! later executed. Atomic batches run every item in one snapshot; non-atomic
//! batches run one snapshot per item with retries. Every executed item is
//! logged on the batch's chain so the whole batch can be undone with
//! [`BatchOperationExecutor::undo_chain`].

mod dispatch;
mod preflight;
mod retry;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use folio_storage::{
    BatchOperation, BatchOperationItem, BatchOperationType, BatchStatus, FolioStorage, ItemStatus,
    LogStatus, OperationLog, StorageError,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::clock::{new_id, now_rfc3339};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::oplog::{LogEntry, OperationLogChain};
use crate::snapshot::finish;
use crate::version_store::VersionStore;

use self::dispatch::OUTCOME_FAILED;
use self::retry::RetryPolicy;

pub(crate) const PREFLIGHT_FAILED: &str = "PREFLIGHT_FAILED";
const CANCELLED: &str = "CANCELLED";

/// A bulk request as submitted by a caller.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub project_id: String,
    pub operation_type: BatchOperationType,
    pub target_ids: Vec<String>,
    pub atomic: bool,
    pub created_by: String,
    /// Idempotency key, unique per project.
    pub client_request_id: Option<String>,
    /// Operation arguments. `move` requires `parent_id` (string, or null for
    /// the project root).
    pub payload: Value,
}

/// Result of [`BatchOperationExecutor::execute`].
#[derive(Debug, Clone)]
pub struct BatchExecution {
    pub batch: BatchOperation,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Execution stopped early because the token was cancelled.
    pub cancelled: bool,
}

impl BatchExecution {
    fn from_batch(batch: BatchOperation, cancelled: bool) -> Self {
        Self {
            succeeded: batch.count_items(ItemStatus::Succeeded),
            failed: batch.count_items(ItemStatus::Failed),
            skipped: batch.count_items(ItemStatus::Skipped),
            batch,
            cancelled,
        }
    }

    /// Turn failed items into `BatchPartialFailure`.
    pub fn ensure_success(self) -> Result<BatchOperation> {
        if self.failed > 0 {
            return Err(EngineError::BatchPartialFailure {
                batch_id: self.batch.id,
                failed: self.failed,
            });
        }
        Ok(self.batch)
    }
}

pub struct BatchOperationExecutor<S: FolioStorage> {
    storage: Arc<S>,
    config: Arc<EngineConfig>,
    logs: OperationLogChain<S>,
    versions: VersionStore<S>,
}

impl<S: FolioStorage> Clone for BatchOperationExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: Arc::clone(&self.config),
            logs: self.logs.clone(),
            versions: self.versions.clone(),
        }
    }
}

impl<S: FolioStorage> BatchOperationExecutor<S> {
    pub fn new(storage: Arc<S>, versions: VersionStore<S>, config: Arc<EngineConfig>) -> Self {
        Self {
            logs: OperationLogChain::new(Arc::clone(&storage)),
            storage,
            config,
            versions,
        }
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Validate, preflight and persist a batch.
    ///
    /// Resubmitting a known `client_request_id` returns the batch created the
    /// first time.
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchOperation> {
        let target_ids = self.normalize_targets(&request.target_ids)?;
        let parent = move_parent(request.operation_type, &request.payload)?;

        if let Some(request_id) = &request.client_request_id {
            if let Some(existing) = self
                .storage
                .find_batch_by_client_request(&request.project_id, request_id)
                .await?
            {
                tracing::info!(
                    batch_id = %existing.id,
                    client_request_id = %request_id,
                    "duplicate submission, returning existing batch"
                );
                return Ok(existing);
            }
        }

        let batch_id = new_id();
        let invalid_status = if request.atomic {
            ItemStatus::Failed
        } else {
            ItemStatus::Skipped
        };
        let preflight = preflight::run(
            self.storage.as_ref(),
            &batch_id,
            &request.project_id,
            request.operation_type,
            parent.as_deref(),
            &target_ids,
            invalid_status,
        )
        .await?;
        let summary = preflight.summary;
        let mut items = preflight.items;

        let failed = summary.valid_count == 0 || (request.atomic && summary.invalid_count > 0);
        if failed {
            for item in items.iter_mut().filter(|i| i.status == ItemStatus::Pending) {
                item.status = invalid_status;
                item.error_code = Some(PREFLIGHT_FAILED.to_string());
            }
        }

        let now = now_rfc3339();
        let batch = BatchOperation {
            id: batch_id,
            project_id: request.project_id,
            operation_type: request.operation_type,
            target_ids,
            atomic: request.atomic,
            created_by: request.created_by,
            client_request_id: request.client_request_id,
            chain_id: OperationLogChain::<S>::new_chain_id(),
            payload: request.payload,
            status: if failed {
                BatchStatus::Failed
            } else {
                BatchStatus::Pending
            },
            items,
            error_code: failed.then(|| PREFLIGHT_FAILED.to_string()),
            error_message: failed.then(|| {
                format!(
                    "{} of {} target(s) failed preflight",
                    summary.invalid_count, summary.total_count
                )
            }),
            preflight: summary,
            created_at: now.clone(),
            started_at: None,
            finished_at: failed.then_some(now),
        };

        let batch = self.insert(batch).await?;
        if batch.status == BatchStatus::Failed {
            tracing::warn!(
                batch_id = %batch.id,
                invalid = batch.preflight.invalid_count,
                total = batch.preflight.total_count,
                "batch failed preflight"
            );
        } else {
            tracing::info!(
                batch_id = %batch.id,
                project_id = %batch.project_id,
                operation = %batch.operation_type,
                atomic = batch.atomic,
                targets = batch.target_ids.len(),
                "batch submitted"
            );
        }
        Ok(batch)
    }

    /// Insert `batch`, resolving client request races to the winning batch.
    async fn insert(&self, batch: BatchOperation) -> Result<BatchOperation> {
        let mut attempts = 0;
        loop {
            let mut snapshot = self.storage.begin_snapshot().await?;
            let inserted = self
                .storage
                .insert_batch_operation(&mut snapshot, batch.clone())
                .await;
            let err = match inserted {
                Ok(()) => match self.storage.commit_snapshot(snapshot).await {
                    Ok(()) => return Ok(batch),
                    Err(e) => e,
                },
                Err(e) => {
                    let _ = self.storage.abort_snapshot(snapshot).await;
                    e
                }
            };
            match err {
                StorageError::DuplicateClientRequest {
                    existing_batch_id, ..
                } => {
                    tracing::info!(
                        batch_id = %existing_batch_id,
                        "lost client request race, returning existing batch"
                    );
                    return Ok(self.storage.get_batch_operation(&existing_batch_id).await?);
                }
                StorageError::Locked { .. } if attempts < self.config.max_item_retries => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                other => return Err(other.into()),
            }
        }
    }

    fn normalize_targets(&self, target_ids: &[String]) -> Result<Vec<String>> {
        if target_ids.is_empty() {
            return Err(EngineError::InvalidArgument(
                "batch needs at least one target".to_string(),
            ));
        }
        if target_ids.iter().any(|t| t.is_empty()) {
            return Err(EngineError::InvalidArgument(
                "target ids must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let deduped: Vec<String> = target_ids
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();
        if deduped.len() > self.config.max_batch_targets {
            return Err(EngineError::InvalidArgument(format!(
                "batch has {} targets, limit is {}",
                deduped.len(),
                self.config.max_batch_targets
            )));
        }
        Ok(deduped)
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Run a pending batch.
    ///
    /// Atomic batches either apply every item or fail with
    /// `AtomicBatchFailed` and leave every node untouched. Non-atomic batches
    /// always end `completed`; check the item counts or call
    /// [`BatchExecution::ensure_success`].
    pub async fn execute(
        &self,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchExecution> {
        let batch = self.claim(batch_id).await?;
        let parent = move_parent(batch.operation_type, &batch.payload)?;
        tracing::info!(
            batch_id,
            atomic = batch.atomic,
            items = batch.items.len(),
            "batch started"
        );
        if batch.atomic {
            self.execute_atomic(batch, parent.as_deref(), cancel).await
        } else {
            self.execute_each(batch, parent.as_deref(), cancel).await
        }
    }

    /// Move a pending batch to running.
    async fn claim(&self, batch_id: &str) -> Result<BatchOperation> {
        let mut batch = self.storage.get_batch_operation(batch_id).await?;
        if batch.status != BatchStatus::Pending {
            return Err(EngineError::InvalidBatchState {
                batch_id: batch.id,
                action: "execute",
                found: batch.status,
            });
        }
        batch.status = BatchStatus::Running;
        batch.started_at = Some(now_rfc3339());
        self.persist(&batch, BatchStatus::Pending)
            .await
            .map_err(|e| match e {
                EngineError::InvalidBatchState {
                    batch_id, found, ..
                } => EngineError::InvalidBatchState {
                    batch_id,
                    action: "execute",
                    found,
                },
                other => other,
            })?;
        Ok(batch)
    }

    async fn execute_each(
        &self,
        mut batch: BatchOperation,
        parent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BatchExecution> {
        let policy = RetryPolicy::from_config(&self.config);
        let mut cancelled = false;

        for idx in 0..batch.items.len() {
            if batch.items[idx].status != ItemStatus::Pending {
                continue;
            }
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                skip_cancelled(&mut batch.items[idx], None);
                continue;
            }

            batch.items[idx].status = ItemStatus::Processing;
            self.persist(&batch, BatchStatus::Running).await?;

            let mut retries = 0;
            let result = loop {
                match self.run_item(&batch, &batch.items[idx], parent).await {
                    Ok(()) => break Ok(()),
                    Err(err) if policy.should_retry(&err, retries) => {
                        retries += 1;
                        tracing::warn!(
                            batch_id = %batch.id,
                            target_id = %batch.items[idx].target_id,
                            attempt = retries,
                            code = err.code(),
                            "retrying batch item"
                        );
                        if !policy.wait(cancel).await {
                            break Err((err, true));
                        }
                    }
                    Err(err) => break Err((err, false)),
                }
            };

            batch.items[idx].retry_count = retries;
            match result {
                Ok(()) => batch.items[idx].status = ItemStatus::Succeeded,
                Err((err, true)) => {
                    cancelled = true;
                    skip_cancelled(&mut batch.items[idx], Some(&err));
                }
                Err((err, false)) => {
                    let item = &mut batch.items[idx];
                    item.status = ItemStatus::Failed;
                    item.error_code = Some(err.code().to_string());
                    item.error_message = Some(err.to_string());
                    item.retryable = policy.is_retryable(&err);
                    tracing::warn!(
                        batch_id = %batch.id,
                        target_id = %item.target_id,
                        code = err.code(),
                        retries,
                        error = %err,
                        "batch item failed"
                    );
                    let target_id = item.target_id.clone();
                    self.record_failure(&batch, &target_id, &err).await;
                }
            }
            self.persist(&batch, BatchStatus::Running).await?;
        }

        batch.status = BatchStatus::Completed;
        batch.finished_at = Some(now_rfc3339());
        self.persist(&batch, BatchStatus::Running).await?;

        let execution = BatchExecution::from_batch(batch, cancelled);
        tracing::info!(
            batch_id = %execution.batch.id,
            succeeded = execution.succeeded,
            failed = execution.failed,
            skipped = execution.skipped,
            cancelled,
            "batch completed"
        );
        Ok(execution)
    }

    /// One item in its own snapshot.
    async fn run_item(
        &self,
        batch: &BatchOperation,
        item: &BatchOperationItem,
        parent: Option<&str>,
    ) -> Result<()> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.apply_logged(&mut snapshot, batch, item, parent).await;
        let log = finish(self.storage.as_ref(), snapshot, result).await?;
        if let Err(e) = self.logs.mark_committed(&log.id).await {
            tracing::warn!(log_id = %log.id, error = %e, "failed to mark log committed");
        }
        Ok(())
    }

    async fn execute_atomic(
        &self,
        mut batch: BatchOperation,
        parent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BatchExecution> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        match self.apply_all(&mut snapshot, &mut batch, parent, cancel).await {
            Ok(()) => {
                if let Err(e) = self.storage.commit_snapshot(snapshot).await {
                    let target_id = batch.target_ids.last().cloned().unwrap_or_default();
                    return self.fail_atomic(batch, target_id, e.into()).await;
                }
                let execution = BatchExecution::from_batch(batch, false);
                tracing::info!(
                    batch_id = %execution.batch.id,
                    succeeded = execution.succeeded,
                    "atomic batch completed"
                );
                Ok(execution)
            }
            Err((target_id, err)) => {
                let _ = self.storage.abort_snapshot(snapshot).await;
                self.fail_atomic(batch, target_id, err).await
            }
        }
    }

    /// Apply every item, log it, and close the batch, all in `snapshot`.
    /// Errors carry the target that triggered them.
    async fn apply_all(
        &self,
        snapshot: &mut S::Snapshot,
        batch: &mut BatchOperation,
        parent: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), (String, EngineError)> {
        let mut log_ids = Vec::with_capacity(batch.items.len());
        for item in &batch.items {
            if cancel.is_cancelled() {
                return Err((item.target_id.clone(), EngineError::Cancelled));
            }
            let log = self
                .apply_logged(snapshot, batch, item, parent)
                .await
                .map_err(|e| (item.target_id.clone(), e))?;
            log_ids.push((item.target_id.clone(), log.id));
        }
        if cancel.is_cancelled() {
            let target_id = batch.target_ids.last().cloned().unwrap_or_default();
            return Err((target_id, EngineError::Cancelled));
        }
        for (target_id, log_id) in &log_ids {
            self.logs
                .mark_committed_in(snapshot, log_id)
                .await
                .map_err(|e| (target_id.clone(), e))?;
        }

        for item in &mut batch.items {
            item.status = ItemStatus::Succeeded;
        }
        batch.status = BatchStatus::Completed;
        batch.finished_at = Some(now_rfc3339());
        self.storage
            .update_batch_operation(snapshot, batch.clone(), BatchStatus::Running)
            .await
            .map_err(|e| (batch.id.clone(), e.into()))
    }

    /// Record the failure of an atomic batch and return `AtomicBatchFailed`.
    async fn fail_atomic(
        &self,
        mut batch: BatchOperation,
        target_id: String,
        err: EngineError,
    ) -> Result<BatchExecution> {
        let policy = RetryPolicy::from_config(&self.config);
        let retryable = policy.is_retryable(&err);
        for item in &mut batch.items {
            item.status = ItemStatus::Failed;
            item.error_code = Some(err.code().to_string());
            item.error_message = Some(err.to_string());
            item.retryable = retryable;
        }
        batch.status = BatchStatus::Failed;
        batch.error_code = Some(err.code().to_string());
        batch.error_message = Some(format!("{target_id}: {err}"));
        batch.finished_at = Some(now_rfc3339());

        let persisted: Result<()> = async {
            let mut snapshot = self.storage.begin_snapshot().await?;
            let result = async {
                self.storage
                    .update_batch_operation(&mut snapshot, batch.clone(), BatchStatus::Running)
                    .await?;
                let entry = self.failure_entry(&batch, &target_id, &err);
                let log = self.logs.record_in(&mut snapshot, entry).await?;
                self.logs.mark_committed_in(&mut snapshot, &log.id).await?;
                Ok(())
            }
            .await;
            finish(self.storage.as_ref(), snapshot, result).await
        }
        .await;
        if let Err(e) = persisted {
            tracing::error!(
                batch_id = %batch.id,
                error = %e,
                "failed to record atomic batch failure"
            );
        }

        tracing::warn!(
            batch_id = %batch.id,
            target_id = %target_id,
            code = err.code(),
            error = %err,
            "atomic batch failed"
        );
        Err(EngineError::AtomicBatchFailed {
            batch_id: batch.id,
            target_id,
            source: Box::new(err),
        })
    }

    async fn apply_logged(
        &self,
        snapshot: &mut S::Snapshot,
        batch: &BatchOperation,
        item: &BatchOperationItem,
        parent: Option<&str>,
    ) -> Result<OperationLog> {
        let payload = dispatch::apply_item(
            self.storage.as_ref(),
            snapshot,
            &batch.id,
            &batch.project_id,
            batch.operation_type,
            parent,
            item,
        )
        .await?;
        let entry = LogEntry {
            project_id: batch.project_id.clone(),
            actor_id: batch.created_by.clone(),
            chain_id: batch.chain_id.clone(),
            command_type: batch.operation_type.command_type(),
            target_ids: vec![item.target_id.clone()],
            payload,
        };
        self.logs.record_in(snapshot, entry).await
    }

    /// Append a committed failure entry for a non-atomic item. Logging
    /// problems are reported but do not change the item outcome.
    async fn record_failure(&self, batch: &BatchOperation, target_id: &str, err: &EngineError) {
        let entry = self.failure_entry(batch, target_id, err);
        let recorded: Result<OperationLog> = async {
            let log = self.logs.record(entry).await?;
            self.logs.mark_committed(&log.id).await
        }
        .await;
        if let Err(e) = recorded {
            tracing::warn!(
                batch_id = %batch.id,
                target_id,
                error = %e,
                "failed to log item failure"
            );
        }
    }

    fn failure_entry(
        &self,
        batch: &BatchOperation,
        target_id: &str,
        err: &EngineError,
    ) -> LogEntry {
        LogEntry {
            project_id: batch.project_id.clone(),
            actor_id: batch.created_by.clone(),
            chain_id: batch.chain_id.clone(),
            command_type: batch.operation_type.command_type(),
            target_ids: vec![target_id.to_string()],
            payload: json!({
                "batch_id": batch.id,
                "target_id": target_id,
                "outcome": OUTCOME_FAILED,
                "error_code": err.code(),
                "error_message": err.to_string(),
            }),
        }
    }

    async fn persist(&self, batch: &BatchOperation, expected: BatchStatus) -> Result<()> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .storage
            .update_batch_operation(&mut snapshot, batch.clone(), expected)
            .await
            .map_err(EngineError::from);
        finish(self.storage.as_ref(), snapshot, result).await
    }

    // ── Undo, cancel, queries ────────────────────────────────────────────────

    /// Revert every executed entry of `chain_id`, newest first, in one
    /// snapshot. Returns the entries undone; a chain with nothing left to
    /// undo returns an empty list.
    pub async fn undo_chain(&self, chain_id: &str) -> Result<Vec<OperationLog>> {
        let executed: Vec<String> = self
            .logs
            .by_chain(chain_id)
            .await?
            .into_iter()
            .filter(|log| log.status == LogStatus::Executed)
            .map(|log| log.id)
            .collect();
        if executed.is_empty() {
            tracing::debug!(chain_id, "nothing to undo");
            return Ok(Vec::new());
        }

        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let mut undone = Vec::with_capacity(executed.len());
            for log_id in executed.iter().rev() {
                let log = self
                    .storage
                    .get_operation_log_for_update(&mut snapshot, log_id)
                    .await?;
                if log.status == LogStatus::Undone {
                    continue;
                }
                dispatch::revert(self.storage.as_ref(), &self.versions, &mut snapshot, &log)
                    .await?;
                undone.push(self.logs.undo_in(&mut snapshot, log).await?);
            }
            Ok(undone)
        }
        .await;
        let undone = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(chain_id, entries = undone.len(), "chain undone");
        Ok(undone)
    }

    /// Cancel a batch that has not started.
    pub async fn cancel(&self, batch_id: &str) -> Result<BatchOperation> {
        let mut batch = self.storage.get_batch_operation(batch_id).await?;
        if batch.status != BatchStatus::Pending {
            return Err(EngineError::InvalidBatchState {
                batch_id: batch.id,
                action: "cancel",
                found: batch.status,
            });
        }
        batch.status = BatchStatus::Cancelled;
        batch.finished_at = Some(now_rfc3339());
        for item in batch
            .items
            .iter_mut()
            .filter(|i| i.status == ItemStatus::Pending)
        {
            item.status = ItemStatus::Cancelled;
        }
        self.persist(&batch, BatchStatus::Pending)
            .await
            .map_err(|e| match e {
                EngineError::InvalidBatchState {
                    batch_id, found, ..
                } => EngineError::InvalidBatchState {
                    batch_id,
                    action: "cancel",
                    found,
                },
                other => other,
            })?;
        tracing::info!(batch_id, "batch cancelled");
        Ok(batch)
    }

    pub async fn get(&self, batch_id: &str) -> Result<BatchOperation> {
        Ok(self.storage.get_batch_operation(batch_id).await?)
    }

    /// Batches of a project, newest first.
    pub async fn list(
        &self,
        project_id: &str,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchOperation>> {
        Ok(self
            .storage
            .list_batch_operations(project_id, status, limit)
            .await?)
    }
}

/// Destination parent of a move: `Some(id)`, or `None` for the root.
fn move_parent(operation: BatchOperationType, payload: &Value) -> Result<Option<String>> {
    match operation {
        BatchOperationType::Delete => Ok(None),
        BatchOperationType::Move => match payload.get("parent_id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(Some(id.clone())),
            Some(Value::Null) => Ok(None),
            Some(other) => Err(EngineError::InvalidArgument(format!(
                "move parent_id must be a non-empty string or null, got {other}"
            ))),
            None => Err(EngineError::InvalidArgument(
                "move requires payload.parent_id".to_string(),
            )),
        },
    }
}

fn skip_cancelled(item: &mut BatchOperationItem, last_error: Option<&EngineError>) {
    item.status = ItemStatus::Skipped;
    item.error_code = Some(CANCELLED.to_string());
    item.error_message = Some(match last_error {
        Some(err) => format!("cancelled while retrying: {err}"),
        None => "cancelled before execution".to_string(),
    });
}

#[cfg(test)]
mod tests {
    use folio_storage::{MemoryStorage, NodeKey};

    use super::*;
    use crate::version_store::NewRevision;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        versions: VersionStore<MemoryStorage>,
        executor: BatchOperationExecutor<MemoryStorage>,
    }

    async fn fixture(nodes: &[&str]) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let config = Arc::new(EngineConfig {
            retry_delay_ms: 1,
            ..EngineConfig::default()
        });
        let versions = VersionStore::new(Arc::clone(&storage), None, Arc::clone(&config));
        for node in nodes {
            versions
                .create_revision(&NodeKey::new("proj", *node), NewRevision::new("alice", "x\n"))
                .await
                .unwrap();
        }
        let executor = BatchOperationExecutor::new(Arc::clone(&storage), versions.clone(), config);
        Fixture {
            storage,
            versions,
            executor,
        }
    }

    fn request(op: BatchOperationType, targets: &[&str], atomic: bool) -> BatchRequest {
        BatchRequest {
            project_id: "proj".to_string(),
            operation_type: op,
            target_ids: targets.iter().map(|t| t.to_string()).collect(),
            atomic,
            created_by: "alice".to_string(),
            client_request_id: None,
            payload: json!({}),
        }
    }

    async fn node(f: &Fixture, id: &str) -> folio_storage::NodeHead {
        f.storage.get_node(&NodeKey::new("proj", id)).await.unwrap()
    }

    #[tokio::test]
    async fn targets_are_deduplicated_in_order() {
        let f = fixture(&["a", "b"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["b", "a", "b"], false))
            .await
            .unwrap();
        assert_eq!(batch.target_ids, ["b", "a"]);
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.items[0].expected_version, Some(1));
    }

    #[tokio::test]
    async fn empty_and_oversized_batches_rejected() {
        let f = fixture(&[]).await;
        let err = f
            .executor
            .submit(request(BatchOperationType::Delete, &[], false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let storage = Arc::new(MemoryStorage::new());
        let config = Arc::new(EngineConfig {
            max_batch_targets: 2,
            ..EngineConfig::default()
        });
        let versions = VersionStore::new(Arc::clone(&storage), None, Arc::clone(&config));
        let small = BatchOperationExecutor::new(storage, versions, config);
        let err = small
            .submit(request(BatchOperationType::Delete, &["a", "b", "c"], false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn move_requires_parent() {
        let f = fixture(&["a"]).await;
        let err = f
            .executor
            .submit(request(BatchOperationType::Move, &["a"], false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn non_atomic_skips_invalid_targets() {
        let f = fixture(&["a"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a", "ghost"], false))
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.preflight.invalid_count, 1);
        assert_eq!(batch.items[1].status, ItemStatus::Skipped);
        assert_eq!(batch.items[1].error_code.as_deref(), Some("PREFLIGHT_INVALID"));

        let run = f
            .executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((run.succeeded, run.failed, run.skipped), (1, 0, 1));
        assert_eq!(run.batch.status, BatchStatus::Completed);
        assert!(node(&f, "a").await.deleted);
    }

    #[tokio::test]
    async fn atomic_with_invalid_target_fails_at_submit() {
        let f = fixture(&["a"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a", "ghost"], true))
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.error_code.as_deref(), Some(PREFLIGHT_FAILED));
        assert!(batch.finished_at.is_some());
        assert_eq!(batch.items[0].status, ItemStatus::Failed);
        assert_eq!(batch.items[0].error_code.as_deref(), Some(PREFLIGHT_FAILED));
        assert_eq!(batch.items[1].status, ItemStatus::Failed);

        let err = f
            .executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_BATCH_STATE");
        assert!(!node(&f, "a").await.deleted);
    }

    #[tokio::test]
    async fn no_valid_targets_fails_preflight() {
        let f = fixture(&[]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["ghost"], false))
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.error_code.as_deref(), Some(PREFLIGHT_FAILED));
    }

    #[tokio::test]
    async fn client_request_id_is_idempotent() {
        let f = fixture(&["a"]).await;
        let mut req = request(BatchOperationType::Delete, &["a"], false);
        req.client_request_id = Some("req-1".to_string());
        let first = f.executor.submit(req.clone()).await.unwrap();
        let second = f.executor.submit(req).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(f.executor.list("proj", None, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn move_reparents_and_undo_restores() {
        let f = fixture(&["a", "b", "folder"]).await;
        let mut req = request(BatchOperationType::Move, &["a", "b"], true);
        req.payload = json!({ "parent_id": "folder" });
        let batch = f.executor.submit(req).await.unwrap();
        let run = f
            .executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.succeeded, 2);
        assert_eq!(node(&f, "a").await.parent_id.as_deref(), Some("folder"));

        let undone = f.executor.undo_chain(&batch.chain_id).await.unwrap();
        assert_eq!(undone.len(), 2);
        assert_eq!(undone[0].target_ids, ["b"]);
        assert_eq!(node(&f, "a").await.parent_id, None);
        assert_eq!(node(&f, "b").await.parent_id, None);
    }

    #[tokio::test]
    async fn atomic_failure_rolls_back_every_item() {
        let f = fixture(&["a", "b"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a", "b"], true))
            .await
            .unwrap();
        // b moves on after preflight captured v1.
        f.versions
            .create_revision(&NodeKey::new("proj", "b"), NewRevision::new("bob", "y\n"))
            .await
            .unwrap();

        let err = f
            .executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap_err();
        match &err {
            EngineError::AtomicBatchFailed {
                target_id, source, ..
            } => {
                assert_eq!(target_id, "b");
                assert_eq!(source.code(), "VERSION_CONFLICT");
            }
            other => panic!("expected AtomicBatchFailed, got {other:?}"),
        }
        assert!(!node(&f, "a").await.deleted);

        let stored = f.executor.get(&batch.id).await.unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some("VERSION_CONFLICT"));
        assert!(stored
            .items
            .iter()
            .all(|i| i.status == ItemStatus::Failed && i.retryable));

        let logs = f
            .storage
            .list_operation_logs_by_chain(&batch.chain_id)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].payload["outcome"], "failed");
        assert!(logs[0].is_committed);
        assert_eq!(f.storage.held_lock_count(), 0);
    }

    #[tokio::test]
    async fn non_atomic_records_item_failure_and_continues() {
        let f = fixture(&["a", "b", "c"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a", "b", "c"], false))
            .await
            .unwrap();
        f.versions
            .create_revision(&NodeKey::new("proj", "b"), NewRevision::new("bob", "y\n"))
            .await
            .unwrap();

        let run = f
            .executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((run.succeeded, run.failed), (2, 1));
        let failed = &run.batch.items[1];
        assert_eq!(failed.error_code.as_deref(), Some("VERSION_CONFLICT"));
        assert!(failed.retryable);
        assert_eq!(failed.retry_count, 2);
        assert!(node(&f, "c").await.deleted);

        let err = run.ensure_success().unwrap_err();
        assert_eq!(err.code(), "BATCH_PARTIAL_FAILURE");
    }

    #[tokio::test]
    async fn cancelled_token_skips_everything() {
        let f = fixture(&["a", "b"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a", "b"], false))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = f.executor.execute(&batch.id, &cancel).await.unwrap();
        assert!(run.cancelled);
        assert_eq!(run.skipped, 2);
        assert_eq!(run.batch.items[0].error_code.as_deref(), Some("CANCELLED"));
        assert!(!node(&f, "a").await.deleted);
    }

    #[tokio::test]
    async fn cancel_only_from_pending() {
        let f = fixture(&["a"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a"], false))
            .await
            .unwrap();
        let cancelled = f.executor.cancel(&batch.id).await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.items[0].status, ItemStatus::Cancelled);

        let err = f.executor.cancel(&batch.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_BATCH_STATE");
        let err = f
            .executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_BATCH_STATE");
    }

    #[tokio::test]
    async fn undo_chain_twice_is_noop() {
        let f = fixture(&["a"]).await;
        let batch = f
            .executor
            .submit(request(BatchOperationType::Delete, &["a"], false))
            .await
            .unwrap();
        f.executor
            .execute(&batch.id, &CancellationToken::new())
            .await
            .unwrap();
        assert!(node(&f, "a").await.deleted);

        assert_eq!(f.executor.undo_chain(&batch.chain_id).await.unwrap().len(), 1);
        assert!(!node(&f, "a").await.deleted);
        assert!(f.executor.undo_chain(&batch.chain_id).await.unwrap().is_empty());
    }
}

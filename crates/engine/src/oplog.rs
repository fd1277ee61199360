//! Append-only command log grouped into undo chains.
//!
//! Entries are plain tagged records. Undoing the effect of an entry is up to
//! whoever dispatches on its `command_type`; this module only tracks status.

use std::sync::Arc;

use folio_storage::{CommandType, FolioStorage, LogStatus, OperationLog};

use crate::clock::{new_id, now_rfc3339};
use crate::error::{EngineError, Result};
use crate::snapshot::finish;

/// Fields of a new log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub project_id: String,
    pub actor_id: String,
    pub chain_id: String,
    pub command_type: CommandType,
    pub target_ids: Vec<String>,
    pub payload: serde_json::Value,
}

pub struct OperationLogChain<S: FolioStorage> {
    storage: Arc<S>,
}

impl<S: FolioStorage> Clone for OperationLogChain<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: FolioStorage> OperationLogChain<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Fresh chain id for a group of related commands.
    pub fn new_chain_id() -> String {
        new_id()
    }

    /// Append an executed, not yet committed entry.
    pub async fn record(&self, entry: LogEntry) -> Result<OperationLog> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.record_in(&mut snapshot, entry).await;
        finish(self.storage.as_ref(), snapshot, result).await
    }

    /// Mark an entry undone.
    ///
    /// Fails with `AlreadyUndone` when it already is.
    pub async fn undo(&self, log_id: &str) -> Result<OperationLog> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let log = self
                .storage
                .get_operation_log_for_update(&mut snapshot, log_id)
                .await?;
            self.undo_in(&mut snapshot, log).await
        }
        .await;
        let log = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(log_id, chain_id = %log.chain_id, "operation undone");
        Ok(log)
    }

    /// Set `is_committed`. Calling it again is a no-op.
    pub async fn mark_committed(&self, log_id: &str) -> Result<OperationLog> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self.mark_committed_in(&mut snapshot, log_id).await;
        finish(self.storage.as_ref(), snapshot, result).await
    }

    pub async fn get(&self, log_id: &str) -> Result<OperationLog> {
        Ok(self.storage.get_operation_log(log_id).await?)
    }

    /// Most recent entries of a project, newest first.
    pub async fn latest_by_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationLog>> {
        Ok(self.storage.list_operation_logs(project_id, limit).await?)
    }

    /// Entries of one chain, oldest first.
    pub async fn by_chain(&self, chain_id: &str) -> Result<Vec<OperationLog>> {
        Ok(self.storage.list_operation_logs_by_chain(chain_id).await?)
    }

    pub(crate) async fn record_in(
        &self,
        snapshot: &mut S::Snapshot,
        entry: LogEntry,
    ) -> Result<OperationLog> {
        let log = OperationLog {
            id: new_id(),
            project_id: entry.project_id,
            actor_id: entry.actor_id,
            chain_id: entry.chain_id,
            command_type: entry.command_type,
            target_ids: entry.target_ids,
            payload: entry.payload,
            status: LogStatus::Executed,
            is_committed: false,
            started_at: now_rfc3339(),
            undone_at: None,
        };
        self.storage
            .insert_operation_log(snapshot, log.clone())
            .await?;
        tracing::debug!(
            log_id = %log.id,
            chain_id = %log.chain_id,
            command = %log.command_type,
            "operation recorded"
        );
        Ok(log)
    }

    pub(crate) async fn undo_in(
        &self,
        snapshot: &mut S::Snapshot,
        mut log: OperationLog,
    ) -> Result<OperationLog> {
        if log.status == LogStatus::Undone {
            return Err(EngineError::AlreadyUndone { log_id: log.id });
        }
        log.status = LogStatus::Undone;
        log.undone_at = Some(now_rfc3339());
        self.storage
            .update_operation_log(snapshot, log.clone(), LogStatus::Executed)
            .await?;
        Ok(log)
    }

    pub(crate) async fn mark_committed_in(
        &self,
        snapshot: &mut S::Snapshot,
        log_id: &str,
    ) -> Result<OperationLog> {
        let mut log = self
            .storage
            .get_operation_log_for_update(snapshot, log_id)
            .await?;
        if log.is_committed {
            return Ok(log);
        }
        log.is_committed = true;
        let status = log.status;
        self.storage
            .update_operation_log(snapshot, log.clone(), status)
            .await?;
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use folio_storage::MemoryStorage;

    use super::*;

    fn entry(chain_id: &str, target: &str) -> LogEntry {
        LogEntry {
            project_id: "proj".to_string(),
            actor_id: "alice".to_string(),
            chain_id: chain_id.to_string(),
            command_type: CommandType::Delete,
            target_ids: vec![target.to_string()],
            payload: serde_json::json!({ "parent_id": null }),
        }
    }

    fn chain() -> OperationLogChain<MemoryStorage> {
        OperationLogChain::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn record_starts_executed_and_uncommitted() {
        let logs = chain();
        let log = logs.record(entry("c1", "doc-1")).await.unwrap();
        assert_eq!(log.status, LogStatus::Executed);
        assert!(!log.is_committed);
        assert!(log.undone_at.is_none());
    }

    #[tokio::test]
    async fn undo_twice_reports_already_undone() {
        let logs = chain();
        let log = logs.record(entry("c1", "doc-1")).await.unwrap();
        let undone = logs.undo(&log.id).await.unwrap();
        assert_eq!(undone.status, LogStatus::Undone);
        assert!(undone.undone_at.is_some());

        let err = logs.undo(&log.id).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_UNDONE");
        assert_eq!(logs.get(&log.id).await.unwrap().status, LogStatus::Undone);
    }

    #[tokio::test]
    async fn undo_unknown_is_not_found() {
        let err = chain().undo("missing").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn mark_committed_is_idempotent() {
        let logs = chain();
        let log = logs.record(entry("c1", "doc-1")).await.unwrap();
        assert!(logs.mark_committed(&log.id).await.unwrap().is_committed);
        assert!(logs.mark_committed(&log.id).await.unwrap().is_committed);
    }

    #[tokio::test]
    async fn listing_orders() {
        let logs = chain();
        let first = logs.record(entry("c1", "doc-1")).await.unwrap();
        let other = logs.record(entry("c2", "doc-2")).await.unwrap();
        let second = logs.record(entry("c1", "doc-3")).await.unwrap();

        let by_chain: Vec<String> = logs
            .by_chain("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(by_chain, [first.id.clone(), second.id.clone()]);

        let latest: Vec<String> = logs
            .latest_by_project("proj", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(latest, [second.id, other.id]);
    }
}

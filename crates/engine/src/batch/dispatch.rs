//! Per-target effects and their inverses, keyed by operation tag.
//!
//! Log payloads written here carry everything `revert` needs:
//! `previous_parent_id`, `parent_id`, `previous_deleted` and, for edits,
//! `previous_version`. Entries with `"outcome": "failed"` had no effect.

use folio_storage::{
    BatchOperationItem, BatchOperationType, CommandType, FolioStorage, NodeHead, NodeKey,
    OperationLog,
};
use serde_json::{json, Value};

use crate::clock::now_rfc3339;
use crate::error::{EngineError, Result};
use crate::version_store::{NewRevision, VersionStore};

pub(crate) const OUTCOME_SUCCEEDED: &str = "succeeded";
pub(crate) const OUTCOME_FAILED: &str = "failed";

/// Apply `operation` to one batch item inside `snapshot` and return the log
/// payload describing what changed.
pub(crate) async fn apply_item<S: FolioStorage>(
    storage: &S,
    snapshot: &mut S::Snapshot,
    batch_id: &str,
    project_id: &str,
    operation: BatchOperationType,
    move_parent: Option<&str>,
    item: &BatchOperationItem,
) -> Result<Value> {
    let key = NodeKey::new(project_id, item.target_id.as_str());
    let expected = item.expected_version.ok_or_else(|| {
        EngineError::InvalidArgument(format!("{key} has no captured version"))
    })?;
    let head = live_head(storage, snapshot, &key).await?;
    let now = now_rfc3339();

    let parent_id = match operation {
        BatchOperationType::Delete => {
            storage
                .update_node(snapshot, &key, expected, true, head.parent_id.clone(), &now)
                .await?;
            head.parent_id.clone()
        }
        BatchOperationType::Move => {
            let parent = move_parent.map(str::to_string);
            storage
                .update_node(snapshot, &key, expected, false, parent.clone(), &now)
                .await?;
            parent
        }
    };

    Ok(json!({
        "batch_id": batch_id,
        "target_id": item.target_id,
        "expected_version": expected,
        "previous_parent_id": head.parent_id,
        "previous_deleted": head.deleted,
        "parent_id": parent_id,
        "outcome": OUTCOME_SUCCEEDED,
    }))
}

/// Undo the effect of `log` inside `snapshot`.
pub(crate) async fn revert<S: FolioStorage>(
    storage: &S,
    versions: &VersionStore<S>,
    snapshot: &mut S::Snapshot,
    log: &OperationLog,
) -> Result<()> {
    if log.payload.get("outcome").and_then(Value::as_str) == Some(OUTCOME_FAILED) {
        return Ok(());
    }
    let previous_parent = log
        .payload
        .get("previous_parent_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    for target_id in &log.target_ids {
        let key = NodeKey::new(log.project_id.as_str(), target_id.as_str());
        let head = storage.get_node_for_update(snapshot, &key).await?;
        let now = now_rfc3339();
        match log.command_type {
            CommandType::Delete | CommandType::BatchDelete => {
                storage
                    .update_node(snapshot, &key, head.version, false, head.parent_id, &now)
                    .await?;
            }
            CommandType::Restore => {
                storage
                    .update_node(snapshot, &key, head.version, true, head.parent_id, &now)
                    .await?;
            }
            CommandType::Move | CommandType::BatchMove => {
                storage
                    .update_node(
                        snapshot,
                        &key,
                        head.version,
                        head.deleted,
                        previous_parent.clone(),
                        &now,
                    )
                    .await?;
            }
            CommandType::Edit => {
                let previous = log
                    .payload
                    .get("previous_version")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        EngineError::InvalidArgument(format!(
                            "edit log {} has no previous_version",
                            log.id
                        ))
                    })?;
                if head.deleted {
                    return Err(EngineError::not_found("node", key.to_string()));
                }
                let content = versions.content_at(&key, previous).await?;
                let rev = NewRevision::new(log.actor_id.as_str(), content)
                    .with_message(Some(format!("undo to v{previous}")))
                    .with_metadata(json!({ "undo_of": log.id }));
                versions
                    .write_revision(snapshot, &key, head.version, rev)
                    .await?;
            }
        }
        tracing::debug!(
            log_id = %log.id,
            command = %log.command_type,
            project_id = %key.project_id,
            node_id = %key.node_id,
            "reverted"
        );
    }
    Ok(())
}

async fn live_head<S: FolioStorage>(
    storage: &S,
    snapshot: &mut S::Snapshot,
    key: &NodeKey,
) -> Result<NodeHead> {
    let head = storage.get_node_for_update(snapshot, key).await?;
    if head.deleted {
        return Err(EngineError::not_found("node", key.to_string()));
    }
    Ok(head)
}

//! Submission-time validation of batch targets.

use folio_storage::{
    BatchOperationItem, BatchOperationType, FolioStorage, ItemStatus, NodeKey, PreflightSummary,
    StorageError,
};

use crate::error::Result;

pub(crate) const PREFLIGHT_INVALID: &str = "PREFLIGHT_INVALID";

/// Per-target preflight outcome plus the aggregate summary.
#[derive(Debug, Clone)]
pub(crate) struct Preflight {
    pub summary: PreflightSummary,
    pub items: Vec<BatchOperationItem>,
}

/// Capture each target's current version; targets that cannot be acted on
/// are reported with status `invalid_status` and `PREFLIGHT_INVALID`.
pub(crate) async fn run<S: FolioStorage>(
    storage: &S,
    batch_id: &str,
    project_id: &str,
    operation_type: BatchOperationType,
    move_parent: Option<&str>,
    target_ids: &[String],
    invalid_status: ItemStatus,
) -> Result<Preflight> {
    let mut summary = PreflightSummary {
        total_count: target_ids.len(),
        ..PreflightSummary::default()
    };
    let mut items = Vec::with_capacity(target_ids.len());

    for target_id in target_ids {
        let problem = match storage.get_node(&NodeKey::new(project_id, target_id.as_str())).await {
            Ok(head) if head.deleted => Err(format!("{target_id}: already deleted")),
            Ok(_) if operation_type == BatchOperationType::Move
                && move_parent == Some(target_id.as_str()) =>
            {
                Err(format!("{target_id}: cannot move a node into itself"))
            }
            Ok(head) => Ok(head.version),
            Err(StorageError::NodeNotFound { .. }) => Err(format!("{target_id}: not found")),
            Err(e) => return Err(e.into()),
        };

        let item = match problem {
            Ok(version) => {
                summary.valid_count += 1;
                BatchOperationItem {
                    batch_id: batch_id.to_string(),
                    target_id: target_id.clone(),
                    expected_version: Some(version),
                    status: ItemStatus::Pending,
                    error_code: None,
                    error_message: None,
                    retryable: false,
                    retry_count: 0,
                }
            }
            Err(message) => {
                summary.invalid_count += 1;
                summary.errors.push(message.clone());
                BatchOperationItem {
                    batch_id: batch_id.to_string(),
                    target_id: target_id.clone(),
                    expected_version: None,
                    status: invalid_status,
                    error_code: Some(PREFLIGHT_INVALID.to_string()),
                    error_message: Some(message),
                    retryable: false,
                    retry_count: 0,
                }
            }
        };
        items.push(item);
    }

    Ok(Preflight { summary, items })
}

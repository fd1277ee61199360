use folio_storage::StorageError;

use crate::conflict::{BatchConflictResult, ConflictInfo};

/// Errors returned by the engine components.
///
/// Every variant maps to a stable string code (see [`EngineError::code`]) so
/// batch items and callers can classify failures without matching on text.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The caller's expected version of a node is stale.
    #[error(
        "version conflict on {}: expected {}, current {}",
        .0.node_id,
        .0.expected_version,
        .0.current_version
    )]
    VersionConflict(Box<ConflictInfo>),

    /// One or more files of a multi-file write are stale.
    #[error("commit conflicts on {} node(s)", conflicting_nodes(.0))]
    Conflict(Box<BatchConflictResult>),

    #[error("patch {patch_id} is {found}, cannot {action}")]
    InvalidPatchState {
        patch_id: String,
        action: &'static str,
        found: folio_storage::PatchStatus,
    },

    /// Auto-merge was refused; the caller has to supply merged content.
    #[error("manual resolution required for {}", .0.node_id)]
    ManualResolutionRequired(Box<ConflictInfo>),

    /// Another writer holds the node right now.
    #[error("node locked: {resource}")]
    NodeLocked { resource: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("operation log {log_id} is already undone")]
    AlreadyUndone { log_id: String },

    #[error("batch {batch_id} finished with {failed} failed item(s)")]
    BatchPartialFailure { batch_id: String, failed: usize },

    /// An atomic batch stopped at `target_id`; nothing was persisted.
    #[error("atomic batch {batch_id} failed at {target_id}: {source}")]
    AtomicBatchFailed {
        batch_id: String,
        target_id: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("batch {batch_id} is {found}, cannot {action}")]
    InvalidBatchState {
        batch_id: String,
        action: &'static str,
        found: folio_storage::BatchStatus,
    },

    #[error("diff format {0} cannot be applied here")]
    UnsupportedDiffFormat(folio_storage::DiffFormat),

    #[error("invalid diff: {0}")]
    InvalidDiff(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl EngineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::VersionConflict(_) => "VERSION_CONFLICT",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::InvalidPatchState { .. } => "INVALID_PATCH_STATE",
            EngineError::ManualResolutionRequired(_) => "MANUAL_RESOLUTION_REQUIRED",
            EngineError::NodeLocked { .. } => "NODE_LOCKED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::AlreadyUndone { .. } => "ALREADY_UNDONE",
            EngineError::BatchPartialFailure { .. } => "BATCH_PARTIAL_FAILURE",
            EngineError::AtomicBatchFailed { .. } => "ATOMIC_BATCH_FAILED",
            EngineError::InvalidBatchState { .. } => "INVALID_BATCH_STATE",
            EngineError::UnsupportedDiffFormat(_) => "UNSUPPORTED_DIFF_FORMAT",
            EngineError::InvalidDiff(_) => "INVALID_DIFF",
            EngineError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EngineError::Cancelled => "CANCELLED",
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Storage(_) => "BACKEND_ERROR",
        }
    }

    /// Whether retrying the same call may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::VersionConflict(_)
                | EngineError::Conflict(_)
                | EngineError::NodeLocked { .. }
                | EngineError::Storage(_)
        )
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ConcurrentConflict {
                project_id,
                node_id,
                expected_version,
                actual_version,
            } => EngineError::VersionConflict(Box::new(ConflictInfo {
                project_id,
                node_id,
                has_conflict: true,
                current_version: actual_version,
                expected_version,
                revisions_since: Vec::new(),
                last_modified_at: None,
            })),
            StorageError::Locked { resource } => EngineError::NodeLocked { resource },
            StorageError::NodeNotFound {
                project_id,
                node_id,
            } => EngineError::not_found("node", format!("{project_id}/{node_id}")),
            StorageError::RevisionNotFound {
                project_id,
                node_id,
                version,
            } => EngineError::not_found("revision", format!("{project_id}/{node_id}@v{version}")),
            StorageError::CommitNotFound { commit_id } => {
                EngineError::not_found("commit", commit_id)
            }
            StorageError::PatchNotFound { patch_id } => EngineError::not_found("patch", patch_id),
            StorageError::OperationLogNotFound { log_id } => {
                EngineError::not_found("operation log", log_id)
            }
            StorageError::BatchNotFound { batch_id } => EngineError::not_found("batch", batch_id),
            StorageError::BlobNotFound { reference } => EngineError::not_found("blob", reference),
            StorageError::PatchStatusMismatch {
                patch_id, found, ..
            } => EngineError::InvalidPatchState {
                patch_id,
                action: "update",
                found,
            },
            StorageError::LogStatusMismatch { log_id, .. } => EngineError::AlreadyUndone { log_id },
            StorageError::BatchStatusMismatch {
                batch_id, found, ..
            } => EngineError::InvalidBatchState {
                batch_id,
                action: "update",
                found,
            },
            other => EngineError::Storage(other),
        }
    }
}

fn conflicting_nodes(result: &BatchConflictResult) -> usize {
    result.conflicting_nodes().count()
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_engine_taxonomy() {
        let locked: EngineError = StorageError::Locked {
            resource: "node:p/n".to_string(),
        }
        .into();
        assert_eq!(locked.code(), "NODE_LOCKED");
        assert!(locked.is_retryable());

        let missing: EngineError = StorageError::NodeNotFound {
            project_id: "p".to_string(),
            node_id: "n".to_string(),
        }
        .into();
        assert_eq!(missing.code(), "NOT_FOUND");
        assert!(!missing.is_retryable());

        let backend: EngineError = StorageError::Backend("connection reset".to_string()).into();
        assert_eq!(backend.code(), "BACKEND_ERROR");
        assert!(backend.is_retryable());
    }

    #[test]
    fn occ_conflict_carries_versions() {
        let err: EngineError = StorageError::ConcurrentConflict {
            project_id: "p".to_string(),
            node_id: "n".to_string(),
            expected_version: 2,
            actual_version: 3,
        }
        .into();
        match err {
            EngineError::VersionConflict(info) => {
                assert_eq!(info.expected_version, 2);
                assert_eq!(info.current_version, 3);
                assert!(info.has_conflict);
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
    }
}

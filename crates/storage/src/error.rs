use crate::record::{BatchStatus, LogStatus, PatchStatus};

/// All errors that can be returned by a FolioStorage implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: the node's version no longer
    /// matches the version the writer expected.
    #[error(
        "concurrent conflict on node {project_id}/{node_id}: expected version {expected_version}, found {actual_version}"
    )]
    ConcurrentConflict {
        project_id: String,
        node_id: String,
        expected_version: i64,
        actual_version: i64,
    },

    /// Another open snapshot holds the lock on this resource.
    #[error("resource locked by another snapshot: {resource}")]
    Locked { resource: String },

    /// No live node with the given (project_id, node_id).
    #[error("node not found: {project_id}/{node_id}")]
    NodeNotFound {
        project_id: String,
        node_id: String,
    },

    #[error("revision not found: {project_id}/{node_id} v{version}")]
    RevisionNotFound {
        project_id: String,
        node_id: String,
        version: i64,
    },

    #[error("commit not found: {commit_id}")]
    CommitNotFound { commit_id: String },

    #[error("patch not found: {patch_id}")]
    PatchNotFound { patch_id: String },

    #[error("patch {patch_id} is {found}, expected {expected}")]
    PatchStatusMismatch {
        patch_id: String,
        expected: PatchStatus,
        found: PatchStatus,
    },

    #[error("operation log not found: {log_id}")]
    OperationLogNotFound { log_id: String },

    #[error("operation log {log_id} is {found}, expected {expected}")]
    LogStatusMismatch {
        log_id: String,
        expected: LogStatus,
        found: LogStatus,
    },

    #[error("batch operation not found: {batch_id}")]
    BatchNotFound { batch_id: String },

    #[error("batch operation {batch_id} is {found}, expected {expected}")]
    BatchStatusMismatch {
        batch_id: String,
        expected: BatchStatus,
        found: BatchStatus,
    },

    /// A batch with this client request id already exists in the project.
    #[error("duplicate client request {client_request_id} in project {project_id} (batch {existing_batch_id})")]
    DuplicateClientRequest {
        project_id: String,
        client_request_id: String,
        existing_batch_id: String,
    },

    /// A record with this id was already inserted.
    #[error("duplicate record id: {id}")]
    DuplicateId { id: String },

    #[error("blob not found: {reference}")]
    BlobNotFound { reference: String },

    /// The snapshot was already committed or aborted.
    #[error("snapshot is closed")]
    SnapshotClosed,

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

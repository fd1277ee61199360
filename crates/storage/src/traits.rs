use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    BatchOperation, BatchStatus, Commit, FilePatch, FileRevision, LogStatus, NodeHead, NodeKey,
    OperationLog, PatchStatus,
};

/// The storage trait for Folio versioning backends.
///
/// A `FolioStorage` implementation provides durable, transactional storage
/// for node heads, file revisions, commits, patches, operation logs and
/// batch operations.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()` -- start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` -- commit and consume the transaction
///    OR `abort_snapshot(snapshot)` -- roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back.
///
/// ## Locking
///
/// Every mutating call, and every `*_for_update` read, locks the touched
/// row until the snapshot ends. Locks are no-wait: a second snapshot touching
/// a locked row gets `Err(StorageError::Locked { .. })` immediately.
///
/// ## OCC Conflict Detection
///
/// `advance_node_version` is the only way a node's version changes. It is a
/// conditional update: `UPDATE ... SET version = version + 1 WHERE version =
/// expected_version`. If the predicate fails, the method returns
/// `Err(StorageError::ConcurrentConflict { .. })`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across async
/// task boundaries.
#[async_trait]
pub trait FolioStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable and visible at once.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Node operations (within snapshot) ────────────────────────────────────

    /// Read a node head and lock it for update. Deleted nodes are returned
    /// with `deleted = true`.
    ///
    /// Returns `Err(StorageError::NodeNotFound)` if the node was never created.
    async fn get_node_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &NodeKey,
    ) -> Result<NodeHead, StorageError>;

    /// Advance a node's version by one, conditional on
    /// `version = expected_version`.
    ///
    /// A node with no head is created on the fly when `expected_version` is 0.
    /// Deleted nodes are not writable and report `NodeNotFound`.
    ///
    /// Returns the new version number on success.
    async fn advance_node_version(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &NodeKey,
        expected_version: i64,
        updated_at: &str,
    ) -> Result<i64, StorageError>;

    /// Set a node's `deleted` flag and `parent_id`, conditional on
    /// `version = expected_version`. The version itself is left unchanged.
    async fn update_node(
        &self,
        snapshot: &mut Self::Snapshot,
        key: &NodeKey,
        expected_version: i64,
        deleted: bool,
        parent_id: Option<String>,
        updated_at: &str,
    ) -> Result<(), StorageError>;

    // ── Recording operations (within snapshot) ────────────────────────────────

    /// Insert a file revision.
    ///
    /// Must be inserted in the SAME snapshot as the `advance_node_version`
    /// call that produced its version: no version without a revision.
    async fn insert_revision(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FileRevision,
    ) -> Result<(), StorageError>;

    /// Insert a commit record.
    async fn insert_commit(
        &self,
        snapshot: &mut Self::Snapshot,
        record: Commit,
    ) -> Result<(), StorageError>;

    /// Insert a new patch.
    async fn insert_patch(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FilePatch,
    ) -> Result<(), StorageError>;

    /// Read a patch and lock it for update.
    async fn get_patch_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        patch_id: &str,
    ) -> Result<FilePatch, StorageError>;

    /// Replace a patch, conditional on its stored status being `expected_status`.
    async fn update_patch(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FilePatch,
        expected_status: PatchStatus,
    ) -> Result<(), StorageError>;

    /// Append an operation log entry.
    async fn insert_operation_log(
        &self,
        snapshot: &mut Self::Snapshot,
        record: OperationLog,
    ) -> Result<(), StorageError>;

    /// Read an operation log entry and lock it for update.
    async fn get_operation_log_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        log_id: &str,
    ) -> Result<OperationLog, StorageError>;

    /// Replace an operation log entry, conditional on its stored status being
    /// `expected_status`.
    async fn update_operation_log(
        &self,
        snapshot: &mut Self::Snapshot,
        record: OperationLog,
        expected_status: LogStatus,
    ) -> Result<(), StorageError>;

    /// Insert a batch operation.
    ///
    /// `client_request_id` is unique per project: a second insert returns
    /// `Err(StorageError::DuplicateClientRequest)` naming the existing batch.
    async fn insert_batch_operation(
        &self,
        snapshot: &mut Self::Snapshot,
        record: BatchOperation,
    ) -> Result<(), StorageError>;

    /// Replace a batch operation, conditional on its stored status being
    /// `expected_status`.
    async fn update_batch_operation(
        &self,
        snapshot: &mut Self::Snapshot,
        record: BatchOperation,
        expected_status: BatchStatus,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Read a node head without locking.
    async fn get_node(&self, key: &NodeKey) -> Result<NodeHead, StorageError>;

    /// Read one revision of a node.
    async fn get_revision(&self, key: &NodeKey, version: i64)
        -> Result<FileRevision, StorageError>;

    /// List revisions of a node with `version > after_version`, ascending.
    ///
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_revisions(
        &self,
        key: &NodeKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<FileRevision>, StorageError>;

    /// List the revisions written by a commit, ordered by node id.
    async fn list_revisions_by_commit(
        &self,
        commit_id: &str,
    ) -> Result<Vec<FileRevision>, StorageError>;

    async fn get_commit(&self, commit_id: &str) -> Result<Commit, StorageError>;

    /// List commits of a project, newest first.
    ///
    /// - `author_id`: filter to one author
    /// - `limit`: maximum number of results (0 = no limit)
    async fn list_commits(
        &self,
        project_id: &str,
        author_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Commit>, StorageError>;

    async fn get_patch(&self, patch_id: &str) -> Result<FilePatch, StorageError>;

    /// List patches of a project, newest first, optionally filtered.
    async fn list_patches(
        &self,
        project_id: &str,
        node_id: Option<&str>,
        status: Option<PatchStatus>,
    ) -> Result<Vec<FilePatch>, StorageError>;

    async fn get_operation_log(&self, log_id: &str) -> Result<OperationLog, StorageError>;

    /// List operation log entries of a project, newest first.
    async fn list_operation_logs(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationLog>, StorageError>;

    /// List the entries of one chain, oldest first.
    async fn list_operation_logs_by_chain(
        &self,
        chain_id: &str,
    ) -> Result<Vec<OperationLog>, StorageError>;

    async fn get_batch_operation(&self, batch_id: &str) -> Result<BatchOperation, StorageError>;

    /// Look up a batch by its client-supplied idempotency key.
    async fn find_batch_by_client_request(
        &self,
        project_id: &str,
        client_request_id: &str,
    ) -> Result<Option<BatchOperation>, StorageError>;

    /// List batch operations of a project, newest first.
    async fn list_batch_operations(
        &self,
        project_id: &str,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchOperation>, StorageError>;
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a node: a document or file unit within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub project_id: String,
    pub node_id: String,
}

impl NodeKey {
    pub fn new(project_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.node_id)
    }
}

/// The current-version row of a node.
///
/// `version` is 0 until the first revision is written. It is only ever
/// changed through [`crate::FolioStorage::advance_node_version`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHead {
    pub project_id: String,
    pub node_id: String,
    pub version: i64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

impl NodeHead {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.project_id, &self.node_id)
    }
}

/// One immutable version of one node's content.
///
/// Exactly one of `snapshot` and `storage_ref` is set. When `compressed` is
/// true, `snapshot` holds base64-encoded zstd bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRevision {
    pub id: String,
    pub project_id: String,
    pub node_id: String,
    pub version: i64,
    pub parent_version: i64,
    pub author_id: String,
    pub message: Option<String>,
    pub snapshot: Option<String>,
    pub storage_ref: Option<String>,
    #[serde(default)]
    pub compressed: bool,
    /// SHA-256 hex digest of the uncompressed content.
    pub content_hash: String,
    pub commit_id: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl FileRevision {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.project_id, &self.node_id)
    }
}

/// A named, auditable group of revisions written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub project_id: String,
    pub author_id: String,
    pub message: Option<String>,
    pub file_count: usize,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffFormat {
    Unified,
    Structured,
    Full,
}

impl DiffFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffFormat::Unified => "unified",
            DiffFormat::Structured => "structured",
            DiffFormat::Full => "full",
        }
    }
}

impl fmt::Display for DiffFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Pending => "pending",
            PatchStatus::Approved => "approved",
            PatchStatus::Rejected => "rejected",
            PatchStatus::Applied => "applied",
        }
    }
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed change to one node, expressed as a diff against `base_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePatch {
    pub id: String,
    pub project_id: String,
    pub node_id: String,
    pub base_version: i64,
    pub diff_format: DiffFormat,
    pub diff_payload: String,
    pub created_by: String,
    pub status: PatchStatus,
    pub preview: Option<String>,
    pub reviewed_by: Option<String>,
    /// Version of the revision written when the patch was applied.
    pub applied_version: Option<i64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

impl FilePatch {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.project_id, &self.node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Executed,
    Undone,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStatus::Executed => f.write_str("executed"),
            LogStatus::Undone => f.write_str("undone"),
        }
    }
}

/// Tag of a logged command. The log carries no behavior; whoever undoes an
/// entry dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Edit,
    Delete,
    Restore,
    Move,
    BatchDelete,
    BatchMove,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandType::Edit => "edit",
            CommandType::Delete => "delete",
            CommandType::Restore => "restore",
            CommandType::Move => "move",
            CommandType::BatchDelete => "batch_delete",
            CommandType::BatchMove => "batch_move",
        };
        f.write_str(s)
    }
}

/// One executed (or undone) command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: String,
    pub project_id: String,
    pub actor_id: String,
    pub chain_id: String,
    pub command_type: CommandType,
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: LogStatus,
    pub is_committed: bool,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub started_at: String,
    /// ISO 8601 / RFC 3339 timestamp string. None until undone.
    pub undone_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperationType {
    Delete,
    Move,
}

impl BatchOperationType {
    /// Command type recorded in the operation log for each executed item.
    pub fn command_type(&self) -> CommandType {
        match self {
            BatchOperationType::Delete => CommandType::BatchDelete,
            BatchOperationType::Move => CommandType::BatchMove,
        }
    }
}

impl fmt::Display for BatchOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOperationType::Delete => f.write_str("delete"),
            BatchOperationType::Move => f.write_str("move"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Outcome of validating the targets of a batch at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightSummary {
    pub total_count: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Per-target outcome of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperationItem {
    pub batch_id: String,
    pub target_id: String,
    /// Version of the target captured at submission. None when the target
    /// failed preflight.
    pub expected_version: Option<i64>,
    pub status: ItemStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub retry_count: u32,
}

/// A single bulk request and the outcome of each of its targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub id: String,
    pub project_id: String,
    pub operation_type: BatchOperationType,
    pub target_ids: Vec<String>,
    pub atomic: bool,
    pub created_by: String,
    pub client_request_id: Option<String>,
    /// Chain shared by every operation log entry written for this batch.
    pub chain_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: BatchStatus,
    pub items: Vec<BatchOperationItem>,
    pub preflight: PreflightSummary,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl BatchOperation {
    pub fn count_items(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

//! Conflict detection and resolution.

mod detect;
mod resolve;

use std::collections::BTreeMap;

use folio_storage::FileRevision;
use serde::{Deserialize, Serialize};

pub use detect::ConflictDetector;
pub use resolve::ConflictResolver;
pub(crate) use resolve::PreparedResolution;

/// Outcome of checking one node's expected version against its current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub project_id: String,
    pub node_id: String,
    pub has_conflict: bool,
    pub current_version: i64,
    pub expected_version: i64,
    /// Revisions written after `expected_version`, ascending.
    pub revisions_since: Vec<FileRevision>,
    pub last_modified_at: Option<String>,
}

/// Per-node conflict report for a multi-file write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConflictResult {
    pub project_id: String,
    pub has_conflicts: bool,
    pub conflicts: BTreeMap<String, ConflictInfo>,
}

impl BatchConflictResult {
    pub fn conflicting_nodes(&self) -> impl Iterator<Item = &ConflictInfo> {
        self.conflicts.values().filter(|c| c.has_conflict)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Merge the caller's edit with the intervening ones when they touch
    /// separate line regions.
    Auto,
    /// Persist caller-merged content.
    Manual,
    /// Overwrite with the caller's content.
    Force,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Auto => "auto",
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::Force => "force",
        }
    }
}

/// How to resolve one conflicting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    pub resolved_by: String,
    pub note: Option<String>,
    /// Merged content for `manual`/`force`; the caller's own edit for `auto`.
    pub content: String,
    /// Version the caller's content was derived from. Only read by `auto`.
    pub base_version: i64,
}

/// Resolutions for several nodes of one project, persisted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConflictResolution {
    pub project_id: String,
    pub author_id: String,
    pub message: Option<String>,
    pub resolutions: BTreeMap<String, ConflictResolution>,
}

//! Patch lifecycle: pending → approved → applied, or pending → rejected.

use std::sync::Arc;

use folio_storage::{DiffFormat, FilePatch, FileRevision, FolioStorage, NodeKey, PatchStatus};
use serde_json::json;

use crate::clock::{new_id, now_rfc3339};
use crate::conflict::ConflictDetector;
use crate::diff::{apply_diff, validate_payload};
use crate::error::{EngineError, Result};
use crate::snapshot::finish;
use crate::version_store::{NewRevision, VersionStore};

/// A change proposed against `base_version` of one node.
#[derive(Debug, Clone)]
pub struct PatchProposal {
    pub project_id: String,
    pub node_id: String,
    pub base_version: i64,
    pub diff_format: DiffFormat,
    pub diff_payload: String,
    pub created_by: String,
    pub preview: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

pub struct PatchManager<S: FolioStorage> {
    storage: Arc<S>,
    versions: VersionStore<S>,
    detector: ConflictDetector<S>,
}

impl<S: FolioStorage> Clone for PatchManager<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            versions: self.versions.clone(),
            detector: self.detector.clone(),
        }
    }
}

impl<S: FolioStorage> PatchManager<S> {
    pub fn new(storage: Arc<S>, versions: VersionStore<S>) -> Self {
        Self {
            detector: ConflictDetector::new(Arc::clone(&storage)),
            storage,
            versions,
        }
    }

    pub async fn propose(&self, proposal: PatchProposal) -> Result<FilePatch> {
        if proposal.base_version < 0 {
            return Err(EngineError::InvalidArgument(format!(
                "base version must not be negative, got {}",
                proposal.base_version
            )));
        }
        validate_payload(proposal.diff_format, &proposal.diff_payload)?;

        let now = now_rfc3339();
        let patch = FilePatch {
            id: new_id(),
            project_id: proposal.project_id,
            node_id: proposal.node_id,
            base_version: proposal.base_version,
            diff_format: proposal.diff_format,
            diff_payload: proposal.diff_payload,
            created_by: proposal.created_by,
            status: PatchStatus::Pending,
            preview: proposal.preview,
            reviewed_by: None,
            applied_version: None,
            metadata: proposal.metadata,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .storage
            .insert_patch(&mut snapshot, patch.clone())
            .await
            .map_err(EngineError::from);
        finish(self.storage.as_ref(), snapshot, result).await?;

        tracing::info!(
            patch_id = %patch.id,
            project_id = %patch.project_id,
            node_id = %patch.node_id,
            base_version = patch.base_version,
            format = %patch.diff_format,
            "patch proposed"
        );
        Ok(patch)
    }

    /// Approve or reject a pending patch.
    pub async fn review(
        &self,
        patch_id: &str,
        decision: ReviewDecision,
        reviewer: &str,
    ) -> Result<FilePatch> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let mut patch = self.storage.get_patch_for_update(&mut snapshot, patch_id).await?;
            if patch.status != PatchStatus::Pending {
                return Err(EngineError::InvalidPatchState {
                    patch_id: patch.id,
                    action: "review",
                    found: patch.status,
                });
            }
            patch.status = match decision {
                ReviewDecision::Approve => PatchStatus::Approved,
                ReviewDecision::Reject => PatchStatus::Rejected,
            };
            patch.reviewed_by = Some(reviewer.to_string());
            patch.updated_at = now_rfc3339();
            self.storage
                .update_patch(&mut snapshot, patch.clone(), PatchStatus::Pending)
                .await?;
            Ok(patch)
        }
        .await;
        let patch = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(patch_id, status = %patch.status, reviewer, "patch reviewed");
        Ok(patch)
    }

    /// Apply an approved patch as a new revision of its node.
    ///
    /// The node must still be at the patch's base version; otherwise this
    /// fails with `VersionConflict` and nothing changes.
    pub async fn apply(&self, patch_id: &str, applied_by: &str) -> Result<FileRevision> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let mut patch = self.storage.get_patch_for_update(&mut snapshot, patch_id).await?;
            if patch.status != PatchStatus::Approved {
                return Err(EngineError::InvalidPatchState {
                    patch_id: patch.id,
                    action: "apply",
                    found: patch.status,
                });
            }
            let key = patch.key();
            let current = self.versions.locked_version(&mut snapshot, &key).await?;
            if current != patch.base_version {
                let info = self.detector.check(&key, patch.base_version).await?;
                return Err(EngineError::VersionConflict(Box::new(info)));
            }

            let base = self.versions.content_at(&key, patch.base_version).await?;
            let content = apply_diff(patch.diff_format, &base, &patch.diff_payload)?;
            let rev = NewRevision::new(applied_by, content)
                .with_message(Some(format!("apply patch {}", patch.id)))
                .with_metadata(json!({ "patch_id": patch.id }));
            let rev = self
                .versions
                .write_revision(&mut snapshot, &key, current, rev)
                .await?;

            patch.status = PatchStatus::Applied;
            patch.applied_version = Some(rev.version);
            patch.updated_at = now_rfc3339();
            self.storage
                .update_patch(&mut snapshot, patch, PatchStatus::Approved)
                .await?;
            Ok(rev)
        }
        .await;
        let rev = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(
            patch_id,
            project_id = %rev.project_id,
            node_id = %rev.node_id,
            version = rev.version,
            "patch applied"
        );
        Ok(rev)
    }

    pub async fn get(&self, patch_id: &str) -> Result<FilePatch> {
        Ok(self.storage.get_patch(patch_id).await?)
    }

    /// Patches of a project, newest first.
    pub async fn list(
        &self,
        project_id: &str,
        node_id: Option<&str>,
        status: Option<PatchStatus>,
    ) -> Result<Vec<FilePatch>> {
        Ok(self.storage.list_patches(project_id, node_id, status).await?)
    }

    /// Pending patches targeting `key`.
    pub async fn pending_for(&self, key: &NodeKey) -> Result<Vec<FilePatch>> {
        self.list(&key.project_id, Some(&key.node_id), Some(PatchStatus::Pending))
            .await
    }
}

#[cfg(test)]
mod tests {
    use folio_storage::MemoryStorage;

    use super::*;
    use crate::config::EngineConfig;

    async fn setup(
        versions_to_write: i64,
    ) -> (
        PatchManager<MemoryStorage>,
        VersionStore<MemoryStorage>,
        NodeKey,
    ) {
        let storage = Arc::new(MemoryStorage::new());
        let versions =
            VersionStore::new(Arc::clone(&storage), None, Arc::new(EngineConfig::default()));
        let key = NodeKey::new("proj", "doc");
        for i in 1..=versions_to_write {
            versions
                .create_revision(&key, NewRevision::new("alice", format!("line {i}\n")))
                .await
                .unwrap();
        }
        (PatchManager::new(storage, versions.clone()), versions, key)
    }

    fn proposal(base_version: i64, format: DiffFormat, payload: &str) -> PatchProposal {
        PatchProposal {
            project_id: "proj".to_string(),
            node_id: "doc".to_string(),
            base_version,
            diff_format: format,
            diff_payload: payload.to_string(),
            created_by: "bot".to_string(),
            preview: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn review_only_from_pending() {
        let (patches, _, _) = setup(1).await;
        let patch = patches
            .propose(proposal(1, DiffFormat::Full, "new\n"))
            .await
            .unwrap();
        let rejected = patches
            .review(&patch.id, ReviewDecision::Reject, "rev")
            .await
            .unwrap();
        assert_eq!(rejected.status, PatchStatus::Rejected);
        assert_eq!(rejected.reviewed_by.as_deref(), Some("rev"));

        let err = patches
            .review(&patch.id, ReviewDecision::Approve, "rev")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PATCH_STATE");
    }

    #[tokio::test]
    async fn apply_requires_approval() {
        let (patches, _, _) = setup(1).await;
        let patch = patches
            .propose(proposal(1, DiffFormat::Full, "new\n"))
            .await
            .unwrap();
        let err = patches.apply(&patch.id, "bot").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PATCH_STATE");
    }

    #[tokio::test]
    async fn structured_patch_applies_against_base() {
        let (patches, versions, key) = setup(1).await;
        let patch = patches
            .propose(proposal(
                1,
                DiffFormat::Structured,
                r#"[{"start": 1, "end": 1, "text": "appended\n"}]"#,
            ))
            .await
            .unwrap();
        patches
            .review(&patch.id, ReviewDecision::Approve, "rev")
            .await
            .unwrap();
        let rev = patches.apply(&patch.id, "bot").await.unwrap();
        assert_eq!(rev.version, 2);
        assert_eq!(
            versions.read_content(&rev).await.unwrap(),
            "line 1\nappended\n"
        );

        let stored = patches.get(&patch.id).await.unwrap();
        assert_eq!(stored.status, PatchStatus::Applied);
        assert_eq!(stored.applied_version, Some(2));
        assert!(patches.pending_for(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_structured_payload_rejected_at_proposal() {
        let (patches, _, _) = setup(1).await;
        let err = patches
            .propose(proposal(1, DiffFormat::Structured, "not json"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DIFF");
    }

    #[tokio::test]
    async fn unified_patch_cannot_be_applied() {
        let (patches, versions, key) = setup(1).await;
        let patch = patches
            .propose(proposal(1, DiffFormat::Unified, "@@ -1 +1 @@\n-line 1\n+x\n"))
            .await
            .unwrap();
        patches
            .review(&patch.id, ReviewDecision::Approve, "rev")
            .await
            .unwrap();
        let err = patches.apply(&patch.id, "bot").await.unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_DIFF_FORMAT");
        assert_eq!(versions.current_version(&key).await.unwrap(), 1);
        assert_eq!(
            patches.get(&patch.id).await.unwrap().status,
            PatchStatus::Approved
        );
    }
}

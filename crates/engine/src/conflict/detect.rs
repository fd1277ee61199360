use std::collections::BTreeMap;
use std::sync::Arc;

use folio_storage::{FolioStorage, NodeKey, StorageError};

use super::{BatchConflictResult, ConflictInfo};
use crate::error::{EngineError, Result};

pub struct ConflictDetector<S: FolioStorage> {
    storage: Arc<S>,
}

impl<S: FolioStorage> Clone for ConflictDetector<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: FolioStorage> ConflictDetector<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Compare `expected_version` with the node's current version.
    ///
    /// Deleted nodes are `NotFound`. A never-written node is at version 0,
    /// so it only matches an expected version of 0.
    pub async fn check(&self, key: &NodeKey, expected_version: i64) -> Result<ConflictInfo> {
        let head = match self.storage.get_node(key).await {
            Ok(head) => head,
            Err(StorageError::NodeNotFound { .. }) if expected_version == 0 => {
                return Ok(ConflictInfo {
                    project_id: key.project_id.clone(),
                    node_id: key.node_id.clone(),
                    has_conflict: false,
                    current_version: 0,
                    expected_version,
                    revisions_since: Vec::new(),
                    last_modified_at: None,
                })
            }
            Err(e) => return Err(e.into()),
        };
        if head.deleted {
            return Err(EngineError::not_found("node", key.to_string()));
        }
        let has_conflict = head.version != expected_version;
        let revisions_since = if has_conflict && head.version > expected_version {
            self.storage
                .list_revisions(key, expected_version.max(0), 0)
                .await?
        } else {
            Vec::new()
        };
        if has_conflict {
            tracing::warn!(
                project_id = %key.project_id,
                node_id = %key.node_id,
                expected_version,
                current_version = head.version,
                "version conflict"
            );
        }
        Ok(ConflictInfo {
            project_id: key.project_id.clone(),
            node_id: key.node_id.clone(),
            has_conflict,
            current_version: head.version,
            expected_version,
            revisions_since,
            last_modified_at: Some(head.updated_at),
        })
    }

    /// Run [`check`](Self::check) for every node of `expected`.
    pub async fn check_batch(
        &self,
        project_id: &str,
        expected: &BTreeMap<String, i64>,
    ) -> Result<BatchConflictResult> {
        let mut conflicts = BTreeMap::new();
        for (node_id, version) in expected {
            let info = self
                .check(&NodeKey::new(project_id, node_id.as_str()), *version)
                .await?;
            conflicts.insert(node_id.clone(), info);
        }
        Ok(BatchConflictResult {
            project_id: project_id.to_string(),
            has_conflicts: conflicts.values().any(|c| c.has_conflict),
            conflicts,
        })
    }

    /// Like [`check`](Self::check), but wraps a conflict into
    /// `VersionConflict`.
    pub async fn ensure_current(&self, key: &NodeKey, expected_version: i64) -> Result<()> {
        let info = self.check(key, expected_version).await?;
        if info.has_conflict {
            return Err(EngineError::VersionConflict(Box::new(info)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use folio_storage::MemoryStorage;

    use super::*;
    use crate::config::EngineConfig;
    use crate::version_store::{NewRevision, VersionStore};

    async fn seeded(versions: i64) -> (Arc<MemoryStorage>, NodeKey) {
        let storage = Arc::new(MemoryStorage::new());
        let vs = VersionStore::new(Arc::clone(&storage), None, Arc::new(EngineConfig::default()));
        let key = NodeKey::new("proj", "doc");
        for i in 1..=versions {
            vs.create_revision(&key, NewRevision::new("alice", format!("v{i}\n")))
                .await
                .unwrap();
        }
        (storage, key)
    }

    #[tokio::test]
    async fn matching_version_is_not_a_conflict() {
        let (storage, key) = seeded(2).await;
        let info = ConflictDetector::new(storage).check(&key, 2).await.unwrap();
        assert!(!info.has_conflict);
        assert!(info.revisions_since.is_empty());
        assert!(info.last_modified_at.is_some());
    }

    #[tokio::test]
    async fn stale_version_lists_intervening_revisions() {
        let (storage, key) = seeded(4).await;
        let info = ConflictDetector::new(storage).check(&key, 1).await.unwrap();
        assert!(info.has_conflict);
        assert_eq!(info.current_version, 4);
        let versions: Vec<i64> = info.revisions_since.iter().map(|r| r.version).collect();
        assert_eq!(versions, [2, 3, 4]);
    }

    #[tokio::test]
    async fn missing_node_is_not_found() {
        let storage = Arc::new(MemoryStorage::new());
        let err = ConflictDetector::new(storage)
            .check(&NodeKey::new("proj", "ghost"), 1)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn new_node_at_zero_is_clean() {
        let storage = Arc::new(MemoryStorage::new());
        let info = ConflictDetector::new(storage)
            .check(&NodeKey::new("proj", "fresh"), 0)
            .await
            .unwrap();
        assert!(!info.has_conflict);
        assert_eq!(info.current_version, 0);
    }

    #[tokio::test]
    async fn batch_ors_over_entries() {
        let (storage, _) = seeded(3).await;
        let detector = ConflictDetector::new(storage);
        let mut expected = BTreeMap::new();
        expected.insert("doc".to_string(), 3);
        assert!(!detector.check_batch("proj", &expected).await.unwrap().has_conflicts);

        expected.insert("doc".to_string(), 2);
        let result = detector.check_batch("proj", &expected).await.unwrap();
        assert!(result.has_conflicts);
        assert_eq!(result.conflicting_nodes().count(), 1);
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use folio_storage::{FileRevision, FolioStorage, NodeKey};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{BatchConflictResolution, ConflictDetector, ConflictResolution, ResolutionStrategy};
use crate::diff::merge_disjoint;
use crate::error::{EngineError, Result};
use crate::snapshot::finish;
use crate::version_store::{NewRevision, VersionStore};

/// A resolution whose final content is known, ready to be written at
/// `expected_version`.
#[derive(Debug, Clone)]
pub(crate) struct PreparedResolution {
    pub key: NodeKey,
    pub expected_version: i64,
    pub revision: NewRevision,
}

pub struct ConflictResolver<S: FolioStorage> {
    storage: Arc<S>,
    detector: ConflictDetector<S>,
    versions: VersionStore<S>,
}

impl<S: FolioStorage> Clone for ConflictResolver<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            detector: self.detector.clone(),
            versions: self.versions.clone(),
        }
    }
}

impl<S: FolioStorage> ConflictResolver<S> {
    pub fn new(storage: Arc<S>, versions: VersionStore<S>) -> Self {
        Self {
            detector: ConflictDetector::new(Arc::clone(&storage)),
            storage,
            versions,
        }
    }

    /// Resolve one node and write the result as a new revision.
    pub async fn resolve(
        &self,
        key: &NodeKey,
        resolution: &ConflictResolution,
    ) -> Result<FileRevision> {
        let prepared = self
            .prepare(key, resolution, &resolution.resolved_by, None)
            .await?;
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = self
            .versions
            .write_revision(
                &mut snapshot,
                &prepared.key,
                prepared.expected_version,
                prepared.revision,
            )
            .await;
        let rev = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(
            project_id = %key.project_id,
            node_id = %key.node_id,
            strategy = resolution.strategy.as_str(),
            version = rev.version,
            "conflict resolved"
        );
        Ok(rev)
    }

    /// Resolve every node of `batch` in one snapshot. Any failure persists
    /// nothing.
    pub async fn resolve_batch(
        &self,
        batch: &BatchConflictResolution,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, FileRevision>> {
        let mut prepared = Vec::with_capacity(batch.resolutions.len());
        for (node_id, resolution) in &batch.resolutions {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let key = NodeKey::new(batch.project_id.as_str(), node_id.as_str());
            prepared.push(
                self.prepare(&key, resolution, &batch.author_id, batch.message.as_deref())
                    .await?,
            );
        }

        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let mut written = BTreeMap::new();
            for p in prepared {
                let rev = self
                    .versions
                    .write_revision(&mut snapshot, &p.key, p.expected_version, p.revision)
                    .await?;
                written.insert(p.key.node_id, rev);
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            Ok(written)
        }
        .await;
        let written = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(
            project_id = %batch.project_id,
            nodes = written.len(),
            "batch conflict resolution persisted"
        );
        Ok(written)
    }

    /// Work out the content a resolution will write, without writing it.
    pub(crate) async fn prepare(
        &self,
        key: &NodeKey,
        resolution: &ConflictResolution,
        author_id: &str,
        fallback_message: Option<&str>,
    ) -> Result<PreparedResolution> {
        let info = self.detector.check(key, resolution.base_version).await?;
        let current = info.current_version;

        let content = match resolution.strategy {
            ResolutionStrategy::Manual | ResolutionStrategy::Force => resolution.content.clone(),
            ResolutionStrategy::Auto if !info.has_conflict => resolution.content.clone(),
            ResolutionStrategy::Auto => {
                if resolution.base_version > current {
                    return Err(EngineError::InvalidArgument(format!(
                        "base version {} is ahead of current version {current} for {key}",
                        resolution.base_version
                    )));
                }
                let base = self.versions.content_at(key, resolution.base_version).await?;
                let theirs = self.versions.content_at(key, current).await?;
                match merge_disjoint(&base, &resolution.content, &theirs) {
                    Some(merged) => merged,
                    None => {
                        tracing::warn!(
                            project_id = %key.project_id,
                            node_id = %key.node_id,
                            base_version = resolution.base_version,
                            current_version = current,
                            "auto merge refused, edits overlap"
                        );
                        return Err(EngineError::ManualResolutionRequired(Box::new(info)));
                    }
                }
            }
        };

        let strategy = resolution.strategy.as_str();
        let message = match (&resolution.note, fallback_message) {
            (Some(note), _) => format!("resolved ({strategy}): {note}"),
            (None, Some(msg)) => msg.to_string(),
            (None, None) => format!("resolved ({strategy})"),
        };
        let revision = NewRevision::new(author_id, content)
            .with_message(Some(message))
            .with_metadata(json!({
                "resolution": {
                    "strategy": strategy,
                    "resolved_by": resolution.resolved_by,
                    "note": resolution.note,
                    "base_version": resolution.base_version,
                    "resolved_against": current,
                }
            }));

        Ok(PreparedResolution {
            key: key.clone(),
            expected_version: current,
            revision,
        })
    }
}

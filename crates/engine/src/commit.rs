//! Multi-file commits.
//!
//! A commit is checked up front against every file's expected version, then
//! written in one snapshot: one revision per file, followed by the commit
//! record. Readers see either all of it or none of it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use folio_storage::{Commit, FileRevision, FolioStorage, NodeKey};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clock::{new_id, now_rfc3339};
use crate::conflict::{
    BatchConflictResult, ConflictDetector, ConflictResolution, ConflictResolver,
};
use crate::error::{EngineError, Result};
use crate::snapshot::finish;
use crate::version_store::{NewRevision, VersionStore};

/// One file of a commit: new content written on top of `expected_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFile {
    pub node_id: String,
    pub content: String,
    pub expected_version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub project_id: String,
    pub author_id: String,
    pub message: Option<String>,
    pub files: Vec<CommitFile>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub commit: Commit,
    /// Written revisions, in the order of the request's files.
    pub revisions: Vec<FileRevision>,
}

pub struct CommitCoordinator<S: FolioStorage> {
    storage: Arc<S>,
    versions: VersionStore<S>,
    detector: ConflictDetector<S>,
    resolver: ConflictResolver<S>,
}

impl<S: FolioStorage> Clone for CommitCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            versions: self.versions.clone(),
            detector: self.detector.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

struct PlannedWrite {
    key: NodeKey,
    expected_version: i64,
    revision: NewRevision,
}

impl<S: FolioStorage> CommitCoordinator<S> {
    pub fn new(storage: Arc<S>, versions: VersionStore<S>, resolver: ConflictResolver<S>) -> Self {
        Self {
            detector: ConflictDetector::new(Arc::clone(&storage)),
            storage,
            versions,
            resolver,
        }
    }

    /// Write every file of `request` or none of them.
    ///
    /// Any stale file fails the whole commit with `Conflict` before anything
    /// is written.
    pub async fn commit(
        &self,
        request: &CommitRequest,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome> {
        let expected = expected_versions(request)?;
        let check = self
            .detector
            .check_batch(&request.project_id, &expected)
            .await?;
        if check.has_conflicts {
            return Err(self.conflict(request, check));
        }

        let plan = request
            .files
            .iter()
            .map(|f| PlannedWrite {
                key: NodeKey::new(request.project_id.as_str(), f.node_id.as_str()),
                expected_version: f.expected_version,
                revision: NewRevision::new(request.author_id.as_str(), f.content.as_str())
                    .with_message(request.message.clone()),
            })
            .collect();
        self.write(request, &expected, plan, cancel).await
    }

    /// Commit with caller-supplied resolutions for conflicting files.
    ///
    /// Every conflicting file needs an entry in `resolutions`. A resolved
    /// file is written with the resolution's content on top of the node's
    /// current version.
    pub async fn commit_with_resolutions(
        &self,
        request: &CommitRequest,
        resolutions: &BTreeMap<String, ConflictResolution>,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome> {
        let expected = expected_versions(request)?;
        if let Some(stray) = resolutions.keys().find(|n| !expected.contains_key(*n)) {
            return Err(EngineError::InvalidArgument(format!(
                "resolution for {stray} which is not part of the commit"
            )));
        }
        let check = self
            .detector
            .check_batch(&request.project_id, &expected)
            .await?;
        let unresolved = check
            .conflicting_nodes()
            .any(|c| !resolutions.contains_key(&c.node_id));
        if unresolved {
            return Err(self.conflict(request, check));
        }

        let mut plan = Vec::with_capacity(request.files.len());
        for file in &request.files {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let key = NodeKey::new(request.project_id.as_str(), file.node_id.as_str());
            let write = match resolutions.get(&file.node_id) {
                Some(resolution) => {
                    let prepared = self
                        .resolver
                        .prepare(
                            &key,
                            resolution,
                            &request.author_id,
                            request.message.as_deref(),
                        )
                        .await?;
                    PlannedWrite {
                        key: prepared.key,
                        expected_version: prepared.expected_version,
                        revision: prepared.revision,
                    }
                }
                None => PlannedWrite {
                    key,
                    expected_version: file.expected_version,
                    revision: NewRevision::new(request.author_id.as_str(), file.content.as_str())
                        .with_message(request.message.clone()),
                },
            };
            plan.push(write);
        }

        let mut refreshed = expected;
        for write in &plan {
            refreshed.insert(write.key.node_id.clone(), write.expected_version);
        }
        self.write(request, &refreshed, plan, cancel).await
    }

    /// A commit and the revisions it wrote, ordered by node id.
    pub async fn get_commit(
        &self,
        project_id: &str,
        commit_id: &str,
    ) -> Result<(Commit, Vec<FileRevision>)> {
        let commit = self.storage.get_commit(commit_id).await?;
        if commit.project_id != project_id {
            return Err(EngineError::not_found("commit", commit_id));
        }
        let revisions = self.storage.list_revisions_by_commit(commit_id).await?;
        Ok((commit, revisions))
    }

    /// Commits of a project, newest first.
    pub async fn list_commits(
        &self,
        project_id: &str,
        author_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Commit>> {
        Ok(self
            .storage
            .list_commits(project_id, author_id, limit, offset)
            .await?)
    }

    /// Persist `plan` in one snapshot.
    ///
    /// Nodes are locked in node id order so that two commits sharing nodes
    /// cannot each hold one and fail on the other. Losing a race to another
    /// writer surfaces as `Conflict`.
    async fn write(
        &self,
        request: &CommitRequest,
        expected: &BTreeMap<String, i64>,
        plan: Vec<PlannedWrite>,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome> {
        let commit_id = new_id();
        let mut ordered: Vec<(usize, PlannedWrite)> = plan.into_iter().enumerate().collect();
        ordered.sort_by(|(_, x), (_, y)| x.key.node_id.cmp(&y.key.node_id));
        let mut contended = None;

        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let mut slots: Vec<Option<FileRevision>> = vec![None; ordered.len()];
            for (slot, mut write) in ordered {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                write.revision.commit_id = Some(commit_id.clone());
                let rev = self
                    .versions
                    .write_revision(
                        &mut snapshot,
                        &write.key,
                        write.expected_version,
                        write.revision,
                    )
                    .await
                    .inspect_err(|_| contended = Some(write.key.node_id.clone()))?;
                slots[slot] = Some(rev);
            }
            let commit = Commit {
                id: commit_id.clone(),
                project_id: request.project_id.clone(),
                author_id: request.author_id.clone(),
                message: request.message.clone(),
                file_count: request.files.len(),
                metadata: request.metadata.clone(),
                created_at: now_rfc3339(),
            };
            self.storage.insert_commit(&mut snapshot, commit.clone()).await?;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let revisions = slots.into_iter().flatten().collect();
            Ok(CommitOutcome { commit, revisions })
        }
        .await;

        match finish(self.storage.as_ref(), snapshot, result).await {
            Ok(outcome) => {
                tracing::info!(
                    commit_id = %outcome.commit.id,
                    project_id = %request.project_id,
                    author_id = %request.author_id,
                    files = outcome.revisions.len(),
                    "commit persisted"
                );
                Ok(outcome)
            }
            Err(EngineError::VersionConflict(_)) | Err(EngineError::NodeLocked { .. }) => {
                let node_id = contended.unwrap_or_default();
                tracing::warn!(
                    project_id = %request.project_id,
                    node_id = %node_id,
                    "commit lost a race, recomputing conflicts"
                );
                let fresh = self
                    .detector
                    .check_batch(&request.project_id, expected)
                    .await?;
                Err(EngineError::Conflict(Box::new(lost_race(fresh, &node_id))))
            }
            Err(e) => Err(e),
        }
    }

    fn conflict(&self, request: &CommitRequest, check: BatchConflictResult) -> EngineError {
        tracing::warn!(
            project_id = %request.project_id,
            author_id = %request.author_id,
            conflicts = check.conflicting_nodes().count(),
            "commit rejected, files are stale"
        );
        EngineError::Conflict(Box::new(check))
    }
}

/// Flag `node_id` in `fresh` when the winner has not committed yet and the
/// recheck still reads the old version.
fn lost_race(mut fresh: BatchConflictResult, node_id: &str) -> BatchConflictResult {
    if !fresh.has_conflicts {
        if let Some(info) = fresh.conflicts.get_mut(node_id) {
            info.has_conflict = true;
        }
        fresh.has_conflicts = true;
    }
    fresh
}

fn expected_versions(request: &CommitRequest) -> Result<BTreeMap<String, i64>> {
    if request.files.is_empty() {
        return Err(EngineError::InvalidArgument(
            "commit needs at least one file".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    let mut expected = BTreeMap::new();
    for file in &request.files {
        if !seen.insert(file.node_id.as_str()) {
            return Err(EngineError::InvalidArgument(format!(
                "file {} listed twice",
                file.node_id
            )));
        }
        expected.insert(file.node_id.clone(), file.expected_version);
    }
    Ok(expected)
}

//! In-process reference backend.
//!
//! `MemoryStorage` keeps every table behind one `parking_lot::Mutex` and
//! implements the full `FolioStorage` contract: snapshot writes are staged in
//! an overlay and published together on commit, row locks are no-wait and are
//! released when the snapshot commits, aborts or is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::blob::BlobStore;
use crate::error::StorageError;
use crate::record::{
    BatchOperation, BatchStatus, Commit, FilePatch, FileRevision, LogStatus, NodeHead, NodeKey,
    OperationLog, PatchStatus,
};
use crate::traits::FolioStorage;

#[derive(Default)]
struct MemoryState {
    next_snapshot_id: u64,
    /// resource -> id of the snapshot holding it
    locks: HashMap<String, u64>,
    nodes: HashMap<NodeKey, NodeHead>,
    revisions: HashMap<NodeKey, Vec<FileRevision>>,
    commits: Vec<Commit>,
    patches: Vec<FilePatch>,
    patch_index: HashMap<String, usize>,
    logs: Vec<OperationLog>,
    log_index: HashMap<String, usize>,
    batches: Vec<BatchOperation>,
    batch_index: HashMap<String, usize>,
    /// (project_id, client_request_id) -> batch id
    client_requests: HashMap<(String, String), String>,
}

impl MemoryState {
    fn acquire(
        &mut self,
        owner: u64,
        held: &mut Vec<String>,
        resource: String,
    ) -> Result<(), StorageError> {
        match self.locks.get(&resource) {
            Some(holder) if *holder != owner => Err(StorageError::Locked { resource }),
            Some(_) => Ok(()),
            None => {
                self.locks.insert(resource.clone(), owner);
                held.push(resource);
                Ok(())
            }
        }
    }

    fn release(&mut self, owner: u64, held: &mut Vec<String>) {
        for resource in held.drain(..) {
            if self.locks.get(&resource) == Some(&owner) {
                self.locks.remove(&resource);
            }
        }
    }
}

fn node_resource(key: &NodeKey) -> String {
    format!("node:{}/{}", key.project_id, key.node_id)
}

fn node_not_found(key: &NodeKey) -> StorageError {
    StorageError::NodeNotFound {
        project_id: key.project_id.clone(),
        node_id: key.node_id.clone(),
    }
}

/// An open transaction against [`MemoryStorage`].
///
/// Mutations are buffered here and become visible only on commit.
pub struct MemorySnapshot {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
    held: Vec<String>,
    open: bool,
    nodes: HashMap<NodeKey, NodeHead>,
    revisions: Vec<FileRevision>,
    commits: Vec<Commit>,
    patches: HashMap<String, FilePatch>,
    new_patches: Vec<String>,
    logs: HashMap<String, OperationLog>,
    new_logs: Vec<String>,
    batches: HashMap<String, BatchOperation>,
    new_batches: Vec<String>,
}

impl MemorySnapshot {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.open {
            Ok(())
        } else {
            Err(StorageError::SnapshotClosed)
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.state.lock();
            state.release(self.id, &mut self.held);
        }
    }
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-memory `FolioStorage` implementation.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of row locks currently held by open snapshots.
    pub fn held_lock_count(&self) -> usize {
        self.state.lock().locks.len()
    }

    /// Total number of revisions stored across all nodes.
    pub fn revision_count(&self) -> usize {
        self.state.lock().revisions.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl FolioStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let mut state = self.state.lock();
        state.next_snapshot_id += 1;
        Ok(MemorySnapshot {
            id: state.next_snapshot_id,
            state: Arc::clone(&self.state),
            held: Vec::new(),
            open: true,
            nodes: HashMap::new(),
            revisions: Vec::new(),
            commits: Vec::new(),
            patches: HashMap::new(),
            new_patches: Vec::new(),
            logs: HashMap::new(),
            new_logs: Vec::new(),
            batches: HashMap::new(),
            new_batches: Vec::new(),
        })
    }

    async fn commit_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();

        // Every touched row is locked by this snapshot, so nothing staged can
        // have been invalidated since it was checked.
        for (key, head) in snapshot.nodes.drain() {
            state.nodes.insert(key, head);
        }
        for rev in snapshot.revisions.drain(..) {
            let list = state.revisions.entry(rev.key()).or_default();
            list.push(rev);
            list.sort_by_key(|r| r.version);
        }
        state.commits.append(&mut snapshot.commits);

        for id in snapshot.new_patches.drain(..) {
            if let Some(patch) = snapshot.patches.remove(&id) {
                let idx = state.patches.len();
                state.patch_index.insert(id, idx);
                state.patches.push(patch);
            }
        }
        for (id, patch) in snapshot.patches.drain() {
            if let Some(&idx) = state.patch_index.get(&id) {
                state.patches[idx] = patch;
            }
        }

        for id in snapshot.new_logs.drain(..) {
            if let Some(log) = snapshot.logs.remove(&id) {
                let idx = state.logs.len();
                state.log_index.insert(id, idx);
                state.logs.push(log);
            }
        }
        for (id, log) in snapshot.logs.drain() {
            if let Some(&idx) = state.log_index.get(&id) {
                state.logs[idx] = log;
            }
        }

        for id in snapshot.new_batches.drain(..) {
            if let Some(batch) = snapshot.batches.remove(&id) {
                if let Some(request_id) = &batch.client_request_id {
                    state
                        .client_requests
                        .insert((batch.project_id.clone(), request_id.clone()), id.clone());
                }
                let idx = state.batches.len();
                state.batch_index.insert(id, idx);
                state.batches.push(batch);
            }
        }
        for (id, batch) in snapshot.batches.drain() {
            if let Some(&idx) = state.batch_index.get(&id) {
                state.batches[idx] = batch;
            }
        }

        snapshot.open = false;
        state.release(snapshot.id, &mut snapshot.held);
        Ok(())
    }

    async fn abort_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        snapshot.close();
        Ok(())
    }

    // ── Nodes ────────────────────────────────────────────────────────────────

    async fn get_node_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &NodeKey,
    ) -> Result<NodeHead, StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        state.acquire(snapshot.id, &mut snapshot.held, node_resource(key))?;
        snapshot
            .nodes
            .get(key)
            .or_else(|| state.nodes.get(key))
            .cloned()
            .ok_or_else(|| node_not_found(key))
    }

    async fn advance_node_version(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &NodeKey,
        expected_version: i64,
        updated_at: &str,
    ) -> Result<i64, StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        state.acquire(snapshot.id, &mut snapshot.held, node_resource(key))?;

        let current = snapshot.nodes.get(key).or_else(|| state.nodes.get(key)).cloned();
        let mut head = match current {
            Some(head) if head.deleted => return Err(node_not_found(key)),
            Some(head) => head,
            None if expected_version == 0 => NodeHead {
                project_id: key.project_id.clone(),
                node_id: key.node_id.clone(),
                version: 0,
                deleted: false,
                parent_id: None,
                updated_at: updated_at.to_string(),
            },
            None => {
                return Err(StorageError::ConcurrentConflict {
                    project_id: key.project_id.clone(),
                    node_id: key.node_id.clone(),
                    expected_version,
                    actual_version: 0,
                })
            }
        };
        if head.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                project_id: key.project_id.clone(),
                node_id: key.node_id.clone(),
                expected_version,
                actual_version: head.version,
            });
        }
        head.version += 1;
        head.updated_at = updated_at.to_string();
        let new_version = head.version;
        snapshot.nodes.insert(key.clone(), head);
        Ok(new_version)
    }

    async fn update_node(
        &self,
        snapshot: &mut MemorySnapshot,
        key: &NodeKey,
        expected_version: i64,
        deleted: bool,
        parent_id: Option<String>,
        updated_at: &str,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        state.acquire(snapshot.id, &mut snapshot.held, node_resource(key))?;

        let mut head = snapshot
            .nodes
            .get(key)
            .or_else(|| state.nodes.get(key))
            .cloned()
            .ok_or_else(|| node_not_found(key))?;
        if head.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                project_id: key.project_id.clone(),
                node_id: key.node_id.clone(),
                expected_version,
                actual_version: head.version,
            });
        }
        head.deleted = deleted;
        head.parent_id = parent_id;
        head.updated_at = updated_at.to_string();
        snapshot.nodes.insert(key.clone(), head);
        Ok(())
    }

    // ── Records ──────────────────────────────────────────────────────────────

    async fn insert_revision(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FileRevision,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let state = self.state.lock();
        let exists = state
            .revisions
            .get(&record.key())
            .is_some_and(|list| list.iter().any(|r| r.version == record.version))
            || snapshot
                .revisions
                .iter()
                .any(|r| r.key() == record.key() && r.version == record.version);
        if exists {
            return Err(StorageError::DuplicateId {
                id: format!("{}@v{}", record.key(), record.version),
            });
        }
        drop(state);
        snapshot.revisions.push(record);
        Ok(())
    }

    async fn insert_commit(
        &self,
        snapshot: &mut MemorySnapshot,
        record: Commit,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let state = self.state.lock();
        if state.commits.iter().any(|c| c.id == record.id)
            || snapshot.commits.iter().any(|c| c.id == record.id)
        {
            return Err(StorageError::DuplicateId { id: record.id });
        }
        drop(state);
        snapshot.commits.push(record);
        Ok(())
    }

    async fn insert_patch(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FilePatch,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        if state.patch_index.contains_key(&record.id) || snapshot.patches.contains_key(&record.id) {
            return Err(StorageError::DuplicateId { id: record.id });
        }
        state.acquire(snapshot.id, &mut snapshot.held, format!("patch:{}", record.id))?;
        snapshot.new_patches.push(record.id.clone());
        snapshot.patches.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_patch_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        patch_id: &str,
    ) -> Result<FilePatch, StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        state.acquire(snapshot.id, &mut snapshot.held, format!("patch:{patch_id}"))?;
        if let Some(patch) = snapshot.patches.get(patch_id) {
            return Ok(patch.clone());
        }
        state
            .patch_index
            .get(patch_id)
            .map(|&idx| state.patches[idx].clone())
            .ok_or_else(|| StorageError::PatchNotFound {
                patch_id: patch_id.to_string(),
            })
    }

    async fn update_patch(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FilePatch,
        expected_status: PatchStatus,
    ) -> Result<(), StorageError> {
        let current = self.get_patch_for_update(snapshot, &record.id).await?;
        if current.status != expected_status {
            return Err(StorageError::PatchStatusMismatch {
                patch_id: record.id,
                expected: expected_status,
                found: current.status,
            });
        }
        snapshot.patches.insert(record.id.clone(), record);
        Ok(())
    }

    async fn insert_operation_log(
        &self,
        snapshot: &mut MemorySnapshot,
        record: OperationLog,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        if state.log_index.contains_key(&record.id) || snapshot.logs.contains_key(&record.id) {
            return Err(StorageError::DuplicateId { id: record.id });
        }
        state.acquire(snapshot.id, &mut snapshot.held, format!("log:{}", record.id))?;
        snapshot.new_logs.push(record.id.clone());
        snapshot.logs.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_operation_log_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        log_id: &str,
    ) -> Result<OperationLog, StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        state.acquire(snapshot.id, &mut snapshot.held, format!("log:{log_id}"))?;
        if let Some(log) = snapshot.logs.get(log_id) {
            return Ok(log.clone());
        }
        state
            .log_index
            .get(log_id)
            .map(|&idx| state.logs[idx].clone())
            .ok_or_else(|| StorageError::OperationLogNotFound {
                log_id: log_id.to_string(),
            })
    }

    async fn update_operation_log(
        &self,
        snapshot: &mut MemorySnapshot,
        record: OperationLog,
        expected_status: LogStatus,
    ) -> Result<(), StorageError> {
        let current = self.get_operation_log_for_update(snapshot, &record.id).await?;
        if current.status != expected_status {
            return Err(StorageError::LogStatusMismatch {
                log_id: record.id,
                expected: expected_status,
                found: current.status,
            });
        }
        snapshot.logs.insert(record.id.clone(), record);
        Ok(())
    }

    async fn insert_batch_operation(
        &self,
        snapshot: &mut MemorySnapshot,
        record: BatchOperation,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        if state.batch_index.contains_key(&record.id) || snapshot.batches.contains_key(&record.id) {
            return Err(StorageError::DuplicateId { id: record.id });
        }
        if let Some(request_id) = &record.client_request_id {
            let key = (record.project_id.clone(), request_id.clone());
            if let Some(existing) = state.client_requests.get(&key) {
                return Err(StorageError::DuplicateClientRequest {
                    project_id: record.project_id.clone(),
                    client_request_id: request_id.clone(),
                    existing_batch_id: existing.clone(),
                });
            }
            state.acquire(
                snapshot.id,
                &mut snapshot.held,
                format!("request:{}/{}", record.project_id, request_id),
            )?;
        }
        state.acquire(snapshot.id, &mut snapshot.held, format!("batch:{}", record.id))?;
        snapshot.new_batches.push(record.id.clone());
        snapshot.batches.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_batch_operation(
        &self,
        snapshot: &mut MemorySnapshot,
        record: BatchOperation,
        expected_status: BatchStatus,
    ) -> Result<(), StorageError> {
        snapshot.ensure_open()?;
        let mut state = self.state.lock();
        state.acquire(snapshot.id, &mut snapshot.held, format!("batch:{}", record.id))?;
        let current_status = match snapshot.batches.get(&record.id) {
            Some(batch) => batch.status,
            None => state
                .batch_index
                .get(&record.id)
                .map(|&idx| state.batches[idx].status)
                .ok_or_else(|| StorageError::BatchNotFound {
                    batch_id: record.id.clone(),
                })?,
        };
        if current_status != expected_status {
            return Err(StorageError::BatchStatusMismatch {
                batch_id: record.id,
                expected: expected_status,
                found: current_status,
            });
        }
        drop(state);
        snapshot.batches.insert(record.id.clone(), record);
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    async fn get_node(&self, key: &NodeKey) -> Result<NodeHead, StorageError> {
        self.state
            .lock()
            .nodes
            .get(key)
            .cloned()
            .ok_or_else(|| node_not_found(key))
    }

    async fn get_revision(
        &self,
        key: &NodeKey,
        version: i64,
    ) -> Result<FileRevision, StorageError> {
        let state = self.state.lock();
        state
            .revisions
            .get(key)
            .and_then(|list| list.iter().find(|r| r.version == version))
            .cloned()
            .ok_or_else(|| StorageError::RevisionNotFound {
                project_id: key.project_id.clone(),
                node_id: key.node_id.clone(),
                version,
            })
    }

    async fn list_revisions(
        &self,
        key: &NodeKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<FileRevision>, StorageError> {
        let state = self.state.lock();
        let Some(list) = state.revisions.get(key) else {
            return Ok(Vec::new());
        };
        let iter = list.iter().filter(|r| r.version > after_version).cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    async fn list_revisions_by_commit(
        &self,
        commit_id: &str,
    ) -> Result<Vec<FileRevision>, StorageError> {
        let state = self.state.lock();
        let mut revs: Vec<FileRevision> = state
            .revisions
            .values()
            .flatten()
            .filter(|r| r.commit_id.as_deref() == Some(commit_id))
            .cloned()
            .collect();
        revs.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(revs)
    }

    async fn get_commit(&self, commit_id: &str) -> Result<Commit, StorageError> {
        self.state
            .lock()
            .commits
            .iter()
            .find(|c| c.id == commit_id)
            .cloned()
            .ok_or_else(|| StorageError::CommitNotFound {
                commit_id: commit_id.to_string(),
            })
    }

    async fn list_commits(
        &self,
        project_id: &str,
        author_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Commit>, StorageError> {
        let state = self.state.lock();
        let iter = state
            .commits
            .iter()
            .rev()
            .filter(|c| c.project_id == project_id)
            .filter(|c| author_id.map_or(true, |a| c.author_id == a))
            .skip(offset)
            .cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    async fn get_patch(&self, patch_id: &str) -> Result<FilePatch, StorageError> {
        let state = self.state.lock();
        state
            .patch_index
            .get(patch_id)
            .map(|&idx| state.patches[idx].clone())
            .ok_or_else(|| StorageError::PatchNotFound {
                patch_id: patch_id.to_string(),
            })
    }

    async fn list_patches(
        &self,
        project_id: &str,
        node_id: Option<&str>,
        status: Option<PatchStatus>,
    ) -> Result<Vec<FilePatch>, StorageError> {
        let state = self.state.lock();
        Ok(state
            .patches
            .iter()
            .rev()
            .filter(|p| p.project_id == project_id)
            .filter(|p| node_id.map_or(true, |n| p.node_id == n))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    async fn get_operation_log(&self, log_id: &str) -> Result<OperationLog, StorageError> {
        let state = self.state.lock();
        state
            .log_index
            .get(log_id)
            .map(|&idx| state.logs[idx].clone())
            .ok_or_else(|| StorageError::OperationLogNotFound {
                log_id: log_id.to_string(),
            })
    }

    async fn list_operation_logs(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationLog>, StorageError> {
        let state = self.state.lock();
        let iter = state
            .logs
            .iter()
            .rev()
            .filter(|l| l.project_id == project_id)
            .cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    async fn list_operation_logs_by_chain(
        &self,
        chain_id: &str,
    ) -> Result<Vec<OperationLog>, StorageError> {
        let state = self.state.lock();
        Ok(state
            .logs
            .iter()
            .filter(|l| l.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn get_batch_operation(&self, batch_id: &str) -> Result<BatchOperation, StorageError> {
        let state = self.state.lock();
        state
            .batch_index
            .get(batch_id)
            .map(|&idx| state.batches[idx].clone())
            .ok_or_else(|| StorageError::BatchNotFound {
                batch_id: batch_id.to_string(),
            })
    }

    async fn find_batch_by_client_request(
        &self,
        project_id: &str,
        client_request_id: &str,
    ) -> Result<Option<BatchOperation>, StorageError> {
        let state = self.state.lock();
        let key = (project_id.to_string(), client_request_id.to_string());
        Ok(state
            .client_requests
            .get(&key)
            .and_then(|id| state.batch_index.get(id))
            .map(|&idx| state.batches[idx].clone()))
    }

    async fn list_batch_operations(
        &self,
        project_id: &str,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchOperation>, StorageError> {
        let state = self.state.lock();
        let iter = state
            .batches
            .iter()
            .rev()
            .filter(|b| b.project_id == project_id)
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }
}

/// In-memory `BlobStore`. References have the form `mem://<key>`.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let reference = format!("mem://{key}");
        self.blobs.lock().insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::BlobNotFound {
                reference: reference.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(node: &str) -> NodeKey {
        NodeKey::new("proj-1", node)
    }

    const T: &str = "2026-01-01T00:00:00Z";

    #[tokio::test]
    async fn advance_creates_head_at_version_one() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        let v = storage
            .advance_node_version(&mut snap, &key("a"), 0, T)
            .await
            .unwrap();
        assert_eq!(v, 1);
        storage.commit_snapshot(snap).await.unwrap();

        let head = storage.get_node(&key("a")).await.unwrap();
        assert_eq!(head.version, 1);
        assert!(!head.deleted);
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .advance_node_version(&mut snap, &key("a"), 0, T)
            .await
            .unwrap();

        assert!(matches!(
            storage.get_node(&key("a")).await,
            Err(StorageError::NodeNotFound { .. })
        ));
        storage.commit_snapshot(snap).await.unwrap();
        assert!(storage.get_node(&key("a")).await.is_ok());
    }

    #[tokio::test]
    async fn second_snapshot_gets_locked_error() {
        let storage = MemoryStorage::new();
        let mut first = storage.begin_snapshot().await.unwrap();
        storage
            .advance_node_version(&mut first, &key("a"), 0, T)
            .await
            .unwrap();

        let mut second = storage.begin_snapshot().await.unwrap();
        let err = storage
            .advance_node_version(&mut second, &key("a"), 0, T)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Locked { .. }));
    }

    #[tokio::test]
    async fn dropped_snapshot_releases_locks_and_discards_writes() {
        let storage = MemoryStorage::new();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .advance_node_version(&mut snap, &key("a"), 0, T)
                .await
                .unwrap();
            assert_eq!(storage.held_lock_count(), 1);
        }
        assert_eq!(storage.held_lock_count(), 0);
        assert!(storage.get_node(&key("a")).await.is_err());
    }

    #[tokio::test]
    async fn deleted_node_is_not_writable() {
        let storage = MemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .advance_node_version(&mut snap, &key("a"), 0, T)
            .await
            .unwrap();
        storage
            .update_node(&mut snap, &key("a"), 1, true, None, T)
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let mut snap = storage.begin_snapshot().await.unwrap();
        let err = storage
            .advance_node_version(&mut snap, &key("a"), 1, T)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn blob_round_trip_and_unknown_reference() {
        let blobs = MemoryBlobStore::new();
        let reference = blobs.put("snapshots/p/n/v1", b"hello".to_vec()).await.unwrap();
        assert_eq!(reference, "mem://snapshots/p/n/v1");
        assert_eq!(blobs.get(&reference).await.unwrap(), b"hello");
        assert!(matches!(
            blobs.get("mem://missing").await,
            Err(StorageError::BlobNotFound { .. })
        ));
    }
}

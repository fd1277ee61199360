//! Per-node revision history.
//!
//! Every write goes through [`VersionStore::write_revision`], which advances
//! the node head with a conditional update and inserts the matching revision
//! in the same snapshot. Callers that group several writes (commits, batch
//! resolution, patch application) pass their own snapshot.

use std::collections::VecDeque;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use folio_storage::{BlobStore, FileRevision, FolioStorage, NodeKey, StorageError};
use serde_json::json;

use crate::clock::{new_id, now_rfc3339};
use crate::config::EngineConfig;
use crate::content::{self, RevisionContent};
use crate::error::{EngineError, Result};
use crate::snapshot::finish;

/// Input for one revision write.
#[derive(Debug, Clone)]
pub struct NewRevision {
    pub author_id: String,
    pub content: RevisionContent,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
    pub commit_id: Option<String>,
}

impl NewRevision {
    pub fn new(author_id: impl Into<String>, content: impl Into<RevisionContent>) -> Self {
        Self {
            author_id: author_id.into(),
            content: content.into(),
            message: None,
            metadata: json!({}),
            commit_id: None,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct VersionStore<S: FolioStorage> {
    storage: Arc<S>,
    blobs: Option<Arc<dyn BlobStore>>,
    config: Arc<EngineConfig>,
}

impl<S: FolioStorage> Clone for VersionStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            blobs: self.blobs.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: FolioStorage> VersionStore<S> {
    pub fn new(
        storage: Arc<S>,
        blobs: Option<Arc<dyn BlobStore>>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            storage,
            blobs,
            config,
        }
    }

    /// Write the next version of `key`.
    ///
    /// The version is `current_version + 1`, claimed with one conditional
    /// update. Returns `NodeLocked` while another writer holds the node.
    pub async fn create_revision(&self, key: &NodeKey, rev: NewRevision) -> Result<FileRevision> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let expected = self.locked_version(&mut snapshot, key).await?;
            self.write_revision(&mut snapshot, key, expected, rev).await
        }
        .await;
        finish(self.storage.as_ref(), snapshot, result).await
    }

    /// Current version of `key`, 0 when it has no history.
    pub async fn current_version(&self, key: &NodeKey) -> Result<i64> {
        match self.storage.get_node(key).await {
            Ok(head) => Ok(head.version),
            Err(StorageError::NodeNotFound { .. }) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Lazily page through the revisions of `key` whose version lies in
    /// `range`, ascending.
    pub fn history(&self, key: &NodeKey, range: impl RangeBounds<i64>) -> RevisionHistory<S> {
        let first = match range.start_bound() {
            Bound::Included(v) => *v,
            Bound::Excluded(v) => v + 1,
            Bound::Unbounded => 1,
        };
        let last = match range.end_bound() {
            Bound::Included(v) => Some(*v),
            Bound::Excluded(v) => Some(v - 1),
            Bound::Unbounded => None,
        };
        RevisionHistory {
            storage: Arc::clone(&self.storage),
            key: key.clone(),
            first: first.max(1),
            last,
            page_size: self.config.history_page_size,
            cursor: first.max(1) - 1,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    pub async fn get_revision(&self, key: &NodeKey, version: i64) -> Result<FileRevision> {
        Ok(self.storage.get_revision(key, version).await?)
    }

    /// Full text of a revision, whatever its storage mode.
    pub async fn read_content(&self, rev: &FileRevision) -> Result<String> {
        content::decode(self.blobs.as_deref(), rev).await
    }

    /// Text of `key` at `version`; version 0 is the empty document.
    pub async fn content_at(&self, key: &NodeKey, version: i64) -> Result<String> {
        if version == 0 {
            return Ok(String::new());
        }
        let rev = self.get_revision(key, version).await?;
        self.read_content(&rev).await
    }

    /// Write a new revision whose content equals `target_version`'s.
    pub async fn rollback_to(
        &self,
        key: &NodeKey,
        target_version: i64,
        author_id: &str,
        message: Option<String>,
    ) -> Result<FileRevision> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let result = async {
            let current = self.locked_version(&mut snapshot, key).await?;
            if target_version < 1 || target_version > current {
                return Err(EngineError::not_found(
                    "revision",
                    format!("{key}@v{target_version}"),
                ));
            }
            let text = self.content_at(key, target_version).await?;
            let rev = NewRevision::new(author_id, text)
                .with_message(
                    message.or_else(|| Some(format!("rollback to v{target_version}"))),
                )
                .with_metadata(json!({
                    "rollback": { "from_version": current, "to_version": target_version }
                }));
            self.write_revision(&mut snapshot, key, current, rev).await
        }
        .await;
        let rev = finish(self.storage.as_ref(), snapshot, result).await?;
        tracing::info!(
            project_id = %key.project_id,
            node_id = %key.node_id,
            target_version,
            version = rev.version,
            "rolled back"
        );
        Ok(rev)
    }

    /// Lock the head of `key` and return its version (0 if absent).
    pub(crate) async fn locked_version(
        &self,
        snapshot: &mut S::Snapshot,
        key: &NodeKey,
    ) -> Result<i64> {
        match self.storage.get_node_for_update(snapshot, key).await {
            Ok(head) if head.deleted => Err(EngineError::not_found("node", key.to_string())),
            Ok(head) => Ok(head.version),
            Err(StorageError::NodeNotFound { .. }) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance `key` from `expected_version` and record the revision, both in
    /// `snapshot`.
    pub(crate) async fn write_revision(
        &self,
        snapshot: &mut S::Snapshot,
        key: &NodeKey,
        expected_version: i64,
        rev: NewRevision,
    ) -> Result<FileRevision> {
        let created_at = now_rfc3339();
        let version = self
            .storage
            .advance_node_version(snapshot, key, expected_version, &created_at)
            .await?;
        let encoded = content::encode(
            &self.config,
            self.blobs.as_deref(),
            key,
            version,
            rev.content,
        )
        .await?;

        let record = FileRevision {
            id: new_id(),
            project_id: key.project_id.clone(),
            node_id: key.node_id.clone(),
            version,
            parent_version: version - 1,
            author_id: rev.author_id,
            message: rev.message,
            snapshot: encoded.snapshot,
            storage_ref: encoded.storage_ref,
            compressed: encoded.compressed,
            content_hash: encoded.content_hash,
            commit_id: rev.commit_id,
            created_at,
            metadata: rev.metadata,
        };
        self.storage.insert_revision(snapshot, record.clone()).await?;
        tracing::debug!(
            project_id = %key.project_id,
            node_id = %key.node_id,
            version,
            compressed = record.compressed,
            external = record.storage_ref.is_some(),
            "revision written"
        );
        Ok(record)
    }
}

/// Restartable ascending cursor over a node's revisions.
///
/// Pages are fetched on demand, `history_page_size` at a time.
pub struct RevisionHistory<S: FolioStorage> {
    storage: Arc<S>,
    key: NodeKey,
    first: i64,
    last: Option<i64>,
    page_size: usize,
    cursor: i64,
    buffer: VecDeque<FileRevision>,
    done: bool,
}

impl<S: FolioStorage> RevisionHistory<S> {
    pub async fn next(&mut self) -> Result<Option<FileRevision>> {
        if self.buffer.is_empty() && !self.done {
            self.fetch_page().await?;
        }
        match self.buffer.pop_front() {
            Some(rev) => {
                self.cursor = rev.version;
                Ok(Some(rev))
            }
            None => Ok(None),
        }
    }

    /// Restart from the beginning of the range.
    pub fn rewind(&mut self) {
        self.cursor = self.first - 1;
        self.buffer.clear();
        self.done = false;
    }

    /// Drain every remaining revision.
    pub async fn collect_remaining(&mut self) -> Result<Vec<FileRevision>> {
        let mut out = Vec::new();
        while let Some(rev) = self.next().await? {
            out.push(rev);
        }
        Ok(out)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let page = self
            .storage
            .list_revisions(&self.key, self.cursor, self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.done = true;
        }
        for rev in page {
            if self.last.is_some_and(|last| rev.version > last) {
                self.done = true;
                break;
            }
            self.buffer.push_back(rev);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use folio_storage::{MemoryBlobStore, MemoryStorage};

    use super::*;

    fn store(page_size: usize) -> VersionStore<MemoryStorage> {
        let config = EngineConfig {
            history_page_size: page_size,
            inline_threshold_bytes: 32,
            ..EngineConfig::default()
        };
        VersionStore::new(
            Arc::new(MemoryStorage::new()),
            Some(Arc::new(MemoryBlobStore::new())),
            Arc::new(config),
        )
    }

    fn key() -> NodeKey {
        NodeKey::new("proj", "doc")
    }

    #[tokio::test]
    async fn versions_are_gapless_with_parent_chain() {
        let vs = store(100);
        for i in 1..=4 {
            let rev = vs
                .create_revision(&key(), NewRevision::new("alice", format!("v{i}\n")))
                .await
                .unwrap();
            assert_eq!(rev.version, i);
            assert_eq!(rev.parent_version, i - 1);
        }
        assert_eq!(vs.current_version(&key()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn unknown_node_is_version_zero() {
        let vs = store(100);
        assert_eq!(vs.current_version(&key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_pages_and_rewinds() {
        let vs = store(2);
        for i in 1..=5 {
            vs.create_revision(&key(), NewRevision::new("alice", format!("v{i}\n")))
                .await
                .unwrap();
        }

        let mut history = vs.history(&key(), 2..=4);
        let versions: Vec<i64> = history
            .collect_remaining()
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, [2, 3, 4]);
        assert!(history.next().await.unwrap().is_none());

        history.rewind();
        assert_eq!(history.next().await.unwrap().unwrap().version, 2);

        let all = vs.history(&key(), ..).collect_remaining().await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn oversized_content_round_trips_through_blob_store() {
        let vs = store(100);
        let text = "a fairly long line that will not fit inline\n".repeat(3);
        let rev = vs
            .create_revision(&key(), NewRevision::new("alice", text.clone()))
            .await
            .unwrap();
        assert!(rev.storage_ref.is_some());
        assert_eq!(vs.read_content(&rev).await.unwrap(), text);
    }

    #[tokio::test]
    async fn rollback_writes_new_revision_with_old_content() {
        let vs = store(100);
        vs.create_revision(&key(), NewRevision::new("alice", "first\n"))
            .await
            .unwrap();
        vs.create_revision(&key(), NewRevision::new("alice", "second\n"))
            .await
            .unwrap();

        let rev = vs.rollback_to(&key(), 1, "bob", None).await.unwrap();
        assert_eq!(rev.version, 3);
        assert_eq!(vs.read_content(&rev).await.unwrap(), "first\n");
        assert_eq!(rev.message.as_deref(), Some("rollback to v1"));

        let err = vs.rollback_to(&key(), 9, "bob", None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}

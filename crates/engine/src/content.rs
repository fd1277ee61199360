//! Snapshot encoding for revisions.
//!
//! Content is stored one of three ways:
//! - inline as plain text,
//! - inline as base64 of zstd-compressed bytes (`compressed = true`),
//! - in a [`BlobStore`], with only the reference kept on the revision.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use folio_storage::{BlobStore, FileRevision, NodeKey, StorageError};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Revision payload supplied by a writer.
#[derive(Debug, Clone, PartialEq)]
pub enum RevisionContent {
    /// Full text of the new version.
    Text(String),
    /// Reference to content the caller already placed in the blob store.
    External(String),
}

impl From<String> for RevisionContent {
    fn from(s: String) -> Self {
        RevisionContent::Text(s)
    }
}

impl From<&str> for RevisionContent {
    fn from(s: &str) -> Self {
        RevisionContent::Text(s.to_string())
    }
}

/// Storage columns of a revision as produced by [`encode`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EncodedContent {
    pub snapshot: Option<String>,
    pub storage_ref: Option<String>,
    pub compressed: bool,
    pub content_hash: String,
}

/// SHA-256 hex digest of `content`.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn blob_key(key: &NodeKey, version: i64) -> String {
    format!("snapshots/{}/{}/v{}", key.project_id, key.node_id, version)
}

pub(crate) async fn encode(
    config: &EngineConfig,
    blobs: Option<&dyn BlobStore>,
    key: &NodeKey,
    version: i64,
    content: RevisionContent,
) -> Result<EncodedContent> {
    let text = match content {
        RevisionContent::External(reference) => {
            let blobs = blobs.ok_or_else(|| {
                EngineError::InvalidArgument("external content requires a blob store".to_string())
            })?;
            let bytes = blobs.get(&reference).await?;
            let text = utf8(bytes)?;
            return Ok(EncodedContent {
                snapshot: None,
                storage_ref: Some(reference),
                compressed: false,
                content_hash: content_hash(&text),
            });
        }
        RevisionContent::Text(text) => text,
    };

    let hash = content_hash(&text);
    if text.len() > config.inline_threshold_bytes {
        if let Some(blobs) = blobs {
            let reference = blobs
                .put(&blob_key(key, version), text.into_bytes())
                .await?;
            tracing::debug!(
                project_id = %key.project_id,
                node_id = %key.node_id,
                version,
                reference = %reference,
                "snapshot stored externally"
            );
            return Ok(EncodedContent {
                snapshot: None,
                storage_ref: Some(reference),
                compressed: false,
                content_hash: hash,
            });
        }
        tracing::warn!(
            project_id = %key.project_id,
            node_id = %key.node_id,
            size = text.len(),
            "no blob store configured, keeping oversized snapshot inline"
        );
    }

    if text.len() >= config.compression_min_bytes {
        let packed = zstd::encode_all(text.as_bytes(), config.compression_level)
            .map_err(|e| EngineError::Storage(StorageError::Backend(format!("zstd: {e}"))))?;
        let encoded = STANDARD.encode(packed);
        if encoded.len() < text.len() {
            return Ok(EncodedContent {
                snapshot: Some(encoded),
                storage_ref: None,
                compressed: true,
                content_hash: hash,
            });
        }
    }

    Ok(EncodedContent {
        snapshot: Some(text),
        storage_ref: None,
        compressed: false,
        content_hash: hash,
    })
}

/// Recover the full text of a revision.
pub(crate) async fn decode(blobs: Option<&dyn BlobStore>, rev: &FileRevision) -> Result<String> {
    if let Some(reference) = &rev.storage_ref {
        let blobs = blobs.ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "revision {} is stored externally but no blob store is configured",
                rev.id
            ))
        })?;
        return utf8(blobs.get(reference).await?);
    }
    let snapshot = rev.snapshot.as_deref().unwrap_or_default();
    if !rev.compressed {
        return Ok(snapshot.to_string());
    }
    let packed = STANDARD
        .decode(snapshot)
        .map_err(|e| EngineError::Storage(StorageError::Backend(format!("base64: {e}"))))?;
    let bytes = zstd::decode_all(packed.as_slice())
        .map_err(|e| EngineError::Storage(StorageError::Backend(format!("zstd: {e}"))))?;
    utf8(bytes)
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        EngineError::Storage(StorageError::Backend(format!(
            "snapshot is not utf-8: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use folio_storage::MemoryBlobStore;

    use super::*;

    fn revision_from(encoded: EncodedContent) -> FileRevision {
        FileRevision {
            id: "rev-1".to_string(),
            project_id: "p".to_string(),
            node_id: "n".to_string(),
            version: 1,
            parent_version: 0,
            author_id: "a".to_string(),
            message: None,
            snapshot: encoded.snapshot,
            storage_ref: encoded.storage_ref,
            compressed: encoded.compressed,
            content_hash: encoded.content_hash,
            commit_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn small_content_stays_plain() {
        let config = EngineConfig::default();
        let key = NodeKey::new("p", "n");
        let encoded = encode(&config, None, &key, 1, "hello\n".into())
            .await
            .unwrap();
        assert!(!encoded.compressed);
        assert_eq!(encoded.snapshot.as_deref(), Some("hello\n"));
        assert_eq!(encoded.content_hash, content_hash("hello\n"));
    }

    #[tokio::test]
    async fn repetitive_content_is_compressed_and_decodes() {
        let config = EngineConfig::default();
        let key = NodeKey::new("p", "n");
        let text = "the same line again\n".repeat(500);
        let encoded = encode(&config, None, &key, 1, text.clone().into())
            .await
            .unwrap();
        assert!(encoded.compressed);
        let rev = revision_from(encoded);
        assert_eq!(decode(None, &rev).await.unwrap(), text);
    }

    #[tokio::test]
    async fn oversized_content_goes_to_blob_store() {
        let config = EngineConfig {
            inline_threshold_bytes: 16,
            ..EngineConfig::default()
        };
        let blobs = MemoryBlobStore::new();
        let key = NodeKey::new("p", "n");
        let text = "x".repeat(64);
        let encoded = encode(&config, Some(&blobs), &key, 7, text.clone().into())
            .await
            .unwrap();
        assert_eq!(encoded.storage_ref.as_deref(), Some("mem://snapshots/p/n/v7"));
        assert!(encoded.snapshot.is_none());
        let rev = revision_from(encoded);
        assert_eq!(decode(Some(&blobs), &rev).await.unwrap(), text);
    }

    #[tokio::test]
    async fn external_reference_requires_blob_store() {
        let config = EngineConfig::default();
        let key = NodeKey::new("p", "n");
        let err = encode(&config, None, &key, 1, RevisionContent::External("mem://x".into()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }
}

use async_trait::async_trait;

use crate::error::StorageError;

/// Large-object store receiving snapshots too big to keep inline.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `bytes` under `key` and return a retrievable reference.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    /// Fetch the bytes behind a reference returned by `put`.
    ///
    /// Returns `Err(StorageError::BlobNotFound)` for unknown references.
    async fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError>;
}

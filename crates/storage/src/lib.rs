mod blob;
mod error;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use blob::BlobStore;
pub use error::StorageError;
pub use memory::{MemoryBlobStore, MemorySnapshot, MemoryStorage};
pub use record::{
    BatchOperation, BatchOperationItem, BatchOperationType, BatchStatus, CommandType, Commit,
    DiffFormat, FilePatch, FileRevision, ItemStatus, LogStatus, NodeHead, NodeKey, OperationLog,
    PatchStatus, PreflightSummary,
};
pub use traits::FolioStorage;

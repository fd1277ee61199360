//! folio-engine: versioning for collaboratively edited documents.
//!
//! Everything here runs on top of a [`FolioStorage`] backend and an optional
//! [`BlobStore`] for large snapshots.
//!
//! # Components
//!
//! - [`VersionStore`] -- gapless per-node revisions, history, rollback
//! - [`PatchManager`] -- propose / review / apply changes against a base
//! - [`ConflictDetector`] and [`ConflictResolver`] -- stale-write detection
//!   and resolution
//! - [`CommitCoordinator`] -- all-or-nothing multi-file commits
//! - [`OperationLogChain`] -- append-only command log with undo status
//! - [`BatchOperationExecutor`] -- bulk delete and move with chain undo
//!
//! [`Engine`] wires all of them to one backend and one [`EngineConfig`].

pub mod batch;
mod clock;
pub mod commit;
pub mod config;
pub mod conflict;
pub mod content;
pub mod diff;
pub mod error;
pub mod oplog;
pub mod patch;
mod snapshot;
pub mod version_store;

use std::sync::Arc;

use folio_storage::{BlobStore, FolioStorage};

// ── Convenience re-exports ───────────────────────────────────────────

pub use batch::{BatchExecution, BatchOperationExecutor, BatchRequest};
pub use commit::{CommitCoordinator, CommitFile, CommitOutcome, CommitRequest};
pub use config::EngineConfig;
pub use conflict::{
    BatchConflictResolution, BatchConflictResult, ConflictDetector, ConflictInfo,
    ConflictResolution, ConflictResolver, ResolutionStrategy,
};
pub use content::{content_hash, RevisionContent};
pub use diff::LineEdit;
pub use error::{EngineError, Result};
pub use oplog::{LogEntry, OperationLogChain};
pub use patch::{PatchManager, PatchProposal, ReviewDecision};
pub use version_store::{NewRevision, RevisionHistory, VersionStore};

/// All engine components sharing one storage backend.
pub struct Engine<S: FolioStorage> {
    config: Arc<EngineConfig>,
    versions: VersionStore<S>,
    detector: ConflictDetector<S>,
    resolver: ConflictResolver<S>,
    patches: PatchManager<S>,
    commits: CommitCoordinator<S>,
    logs: OperationLogChain<S>,
    batches: BatchOperationExecutor<S>,
}

impl<S: FolioStorage> Engine<S> {
    /// Build an engine without a blob store. Oversized content stays inline.
    pub fn new(storage: Arc<S>, config: EngineConfig) -> Result<Self> {
        Self::build(storage, None, config)
    }

    pub fn with_blob_store(
        storage: Arc<S>,
        blobs: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::build(storage, Some(blobs), config)
    }

    fn build(
        storage: Arc<S>,
        blobs: Option<Arc<dyn BlobStore>>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let versions = VersionStore::new(Arc::clone(&storage), blobs, Arc::clone(&config));
        let resolver = ConflictResolver::new(Arc::clone(&storage), versions.clone());
        let engine = Self {
            detector: ConflictDetector::new(Arc::clone(&storage)),
            patches: PatchManager::new(Arc::clone(&storage), versions.clone()),
            commits: CommitCoordinator::new(
                Arc::clone(&storage),
                versions.clone(),
                resolver.clone(),
            ),
            logs: OperationLogChain::new(Arc::clone(&storage)),
            batches: BatchOperationExecutor::new(
                Arc::clone(&storage),
                versions.clone(),
                Arc::clone(&config),
            ),
            resolver,
            versions,
            config,
        };
        tracing::debug!(
            inline_threshold_bytes = engine.config.inline_threshold_bytes,
            max_batch_targets = engine.config.max_batch_targets,
            max_item_retries = engine.config.max_item_retries,
            "engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn versions(&self) -> &VersionStore<S> {
        &self.versions
    }

    pub fn detector(&self) -> &ConflictDetector<S> {
        &self.detector
    }

    pub fn resolver(&self) -> &ConflictResolver<S> {
        &self.resolver
    }

    pub fn patches(&self) -> &PatchManager<S> {
        &self.patches
    }

    pub fn commits(&self) -> &CommitCoordinator<S> {
        &self.commits
    }

    pub fn logs(&self) -> &OperationLogChain<S> {
        &self.logs
    }

    pub fn batches(&self) -> &BatchOperationExecutor<S> {
        &self.batches
    }
}

use std::sync::Arc;

use folio_engine::{Engine, EngineConfig, NewRevision};
use folio_storage::{MemoryStorage, NodeKey};

pub const PROJECT: &str = "proj";

/// Route engine logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> (Arc<MemoryStorage>, Engine<MemoryStorage>) {
    engine_with(EngineConfig {
        retry_delay_ms: 1,
        ..EngineConfig::default()
    })
}

pub fn engine_with(config: EngineConfig) -> (Arc<MemoryStorage>, Engine<MemoryStorage>) {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let engine = Engine::new(Arc::clone(&storage), config).expect("valid config");
    (storage, engine)
}

pub fn key(node_id: &str) -> NodeKey {
    NodeKey::new(PROJECT, node_id)
}

/// Write `versions` revisions to `node_id` and return its key.
pub async fn seed(engine: &Engine<MemoryStorage>, node_id: &str, versions: i64) -> NodeKey {
    let key = key(node_id);
    for v in 1..=versions {
        engine
            .versions()
            .create_revision(&key, NewRevision::new("seed", format!("{node_id} v{v}\n")))
            .await
            .expect("seed revision");
    }
    key
}

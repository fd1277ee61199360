//! Engine configuration.
//!
//! Loaded from TOML with every field defaulted, then optionally overridden by
//! `FOLIO_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Content larger than this goes to the blob store.
    pub inline_threshold_bytes: usize,
    /// Inline content at or above this size is considered for compression.
    pub compression_min_bytes: usize,
    pub compression_level: i32,
    /// Revisions fetched per page by `RevisionHistory`.
    pub history_page_size: usize,
    pub max_batch_targets: usize,
    /// Extra attempts for a retryable item failure in non-atomic batches.
    pub max_item_retries: u32,
    pub retry_delay_ms: u64,
    /// Error codes recorded as `retryable` on batch items.
    pub retryable_error_codes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: 64 * 1024,
            compression_min_bytes: 4096,
            compression_level: 3,
            history_page_size: 100,
            max_batch_targets: 1000,
            max_item_retries: 2,
            retry_delay_ms: 100,
            retryable_error_codes: vec![
                "VERSION_CONFLICT".to_string(),
                "NODE_LOCKED".to_string(),
                "BACKEND_ERROR".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply `FOLIO_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse("FOLIO_INLINE_THRESHOLD_BYTES")? {
            self.inline_threshold_bytes = v;
        }
        if let Some(v) = env_parse("FOLIO_MAX_BATCH_TARGETS")? {
            self.max_batch_targets = v;
        }
        if let Some(v) = env_parse("FOLIO_MAX_ITEM_RETRIES")? {
            self.max_item_retries = v;
        }
        if let Some(v) = env_parse("FOLIO_RETRY_DELAY_MS")? {
            self.retry_delay_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inline_threshold_bytes == 0 {
            return Err(EngineError::Config(
                "inline_threshold_bytes must be greater than 0".to_string(),
            ));
        }
        if self.history_page_size == 0 {
            return Err(EngineError::Config(
                "history_page_size must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_targets == 0 {
            return Err(EngineError::Config(
                "max_batch_targets must be greater than 0".to_string(),
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(EngineError::Config(format!(
                "compression_level must be in 1..=22, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub(crate) fn is_retryable_code(&self, code: &str) -> bool {
        self.retryable_error_codes.iter().any(|c| c == code)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{name}: cannot parse {raw:?}"))),
        Err(_) => Ok(None),
    }
}

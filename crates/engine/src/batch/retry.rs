use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Retry rules for items of non-atomic batches.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy<'a> {
    config: &'a EngineConfig,
}

impl<'a> RetryPolicy<'a> {
    pub(crate) fn from_config(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Whether `err` is classified retryable for item reporting.
    pub(crate) fn is_retryable(&self, err: &EngineError) -> bool {
        self.config.is_retryable_code(err.code())
    }

    /// Whether another attempt should follow `retries_so_far` retries.
    pub(crate) fn should_retry(&self, err: &EngineError, retries_so_far: u32) -> bool {
        retries_so_far < self.config.max_item_retries && self.is_retryable(err)
    }

    /// Sleep for the retry delay. Returns false if cancelled while waiting.
    pub(crate) async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            max_item_retries: 2,
            retry_delay_ms: 1,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn only_listed_codes_retry() {
        let config = config();
        let p = RetryPolicy::from_config(&config);
        let locked = EngineError::NodeLocked {
            resource: "node:p/n".to_string(),
        };
        let missing = EngineError::not_found("node", "p/n");
        assert!(p.should_retry(&locked, 0));
        assert!(p.should_retry(&locked, 1));
        assert!(!p.should_retry(&locked, 2));
        assert!(!p.should_retry(&missing, 0));
        assert!(!p.is_retryable(&missing));
    }

    #[tokio::test]
    async fn wait_stops_on_cancel() {
        let slow = EngineConfig {
            retry_delay_ms: 60_000,
            ..EngineConfig::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!RetryPolicy::from_config(&slow).wait(&cancel).await);

        let fast = config();
        assert!(RetryPolicy::from_config(&fast).wait(&CancellationToken::new()).await);
    }
}

//! Builder pattern for the engine.

use strata_traits::config::EngineConfig;
use strata_traits::storage::StorageAdapter;

use crate::error::EngineError;
use crate::StrataEngine;

/// Builder for constructing a [`StrataEngine`].
#[derive(Default)]
pub struct StrataEngineBuilder {
    config: Option<EngineConfig>,
    storage: Option<StorageAdapter>,
}

impl StrataEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the storage adapter.
    pub fn with_storage(mut self, storage: StorageAdapter) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<StrataEngine, EngineError> {
        let config = self.config.unwrap_or_default();

        let storage = self
            .storage
            .ok_or_else(|| EngineError::ConfigError("storage not configured".into()))?;

        Ok(StrataEngine::new(config, storage))
    }
}

//! Engine configuration.
//!
//! Configuration contains:
//! - Cache sizing (entry counts)
//! - Hierarchy snapshot time-to-live
//!
//! Configuration does NOT contain:
//! - Storage locations (that's the server's concern)
//! - Variation data (that's storage)

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default hierarchy snapshot TTL: 10 minutes.
pub const DEFAULT_HIERARCHY_TTL_SECS: u64 = 600;

/// Default entry capacity of each variation context cache.
pub const DEFAULT_CONTEXT_CACHE_CAPACITY: usize = 10_000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine name/identifier
    pub name: String,

    /// Seconds a hierarchy snapshot stays valid before it is rebuilt
    pub hierarchy_ttl_secs: u64,

    /// Max cached `sorted value ids -> context id` entries
    pub context_id_cache_capacity: usize,

    /// Max cached `context id -> variation` entries
    pub context_values_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "strata-engine".to_string(),
            hierarchy_ttl_secs: DEFAULT_HIERARCHY_TTL_SECS,
            context_id_cache_capacity: DEFAULT_CONTEXT_CACHE_CAPACITY,
            context_values_cache_capacity: DEFAULT_CONTEXT_CACHE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Hierarchy snapshot TTL.
    pub fn hierarchy_ttl(&self) -> Duration {
        Duration::from_secs(self.hierarchy_ttl_secs)
    }

    /// Config with tiny caches, for tests exercising eviction.
    pub fn minimal() -> Self {
        Self {
            name: "strata-minimal".to_string(),
            hierarchy_ttl_secs: 1,
            context_id_cache_capacity: 1,
            context_values_cache_capacity: 1,
        }
    }

    /// Builder method to set the hierarchy TTL.
    pub fn with_hierarchy_ttl(mut self, ttl: Duration) -> Self {
        self.hierarchy_ttl_secs = ttl.as_secs();
        self
    }

    /// Builder method to set both context cache capacities.
    pub fn with_context_cache_capacity(mut self, capacity: usize) -> Self {
        self.context_id_cache_capacity = capacity;
        self.context_values_cache_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.hierarchy_ttl(), Duration::from_secs(600));
        assert_eq!(config.context_id_cache_capacity, 10_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("hierarchy_ttl_secs = 30").unwrap();
        assert_eq!(config.hierarchy_ttl_secs, 30);
        assert_eq!(config.context_values_cache_capacity, DEFAULT_CONTEXT_CACHE_CAPACITY);
        assert_eq!(config.name, "strata-engine");
    }
}

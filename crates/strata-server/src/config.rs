//! Server configuration.

use serde::{Deserialize, Serialize};

use strata_traits::EngineConfig;

/// `storage_path` value selecting the in-memory store.
pub const MEMORY_STORAGE: &str = ":memory:";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redb file path, or `:memory:`
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Engine cache settings
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage_path() -> String {
    "./data/strata.redb".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage_path: default_storage_path(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Returns true if the in-memory store is selected.
    pub fn is_in_memory(&self) -> bool {
        self.storage_path == MEMORY_STORAGE
    }
}

//! # Strata Server
//!
//! REST server for the Strata variation resolution engine.
//!
//! ## Features
//!
//! - Hierarchy inspection and structural writes
//! - Variation context lookup for value writers
//! - Configuration resolution
//! - Permission checks
//! - Configuration via TOML file
//!
//! ## Usage
//!
//! ```ignore
//! use strata_server::{create_storage, Server, ServerConfig};
//!
//! let config = ServerConfig::default();
//! let engine = StrataEngineBuilder::new()
//!     .with_config(config.engine.clone())
//!     .with_storage(create_storage(&config)?)
//!     .build()?;
//! Server::new(config, Arc::new(engine)).start().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handlers;
pub mod routes;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use strata_engine::StrataEngine;
use strata_storage::{InMemoryStore, RedbStore, StorageError};
use strata_traits::StorageAdapter;

pub use config::ServerConfig;

/// Server startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Storage could not be opened
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Socket or file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the storage backend selected by the configuration.
pub fn create_storage(config: &ServerConfig) -> Result<StorageAdapter, ServerError> {
    if config.is_in_memory() {
        info!("Using in-memory storage");
        return Ok(StorageAdapter::from_store(Arc::new(InMemoryStore::new())));
    }

    let path = Path::new(&config.storage_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    info!("Opening redb storage at {}", path.display());
    Ok(StorageAdapter::from_store(Arc::new(RedbStore::open(path)?)))
}

/// The Strata server.
pub struct Server {
    config: ServerConfig,
    engine: Arc<StrataEngine>,
}

impl Server {
    /// Create a new server.
    pub fn new(config: ServerConfig, engine: Arc<StrataEngine>) -> Self {
        Self { config, engine }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        routes::create_router(self.engine.clone())
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Start the server.
    pub async fn start(&self) -> Result<(), ServerError> {
        let addr = SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        );

        info!("Starting Strata server on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

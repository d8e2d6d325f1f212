//! Strata server entry point.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_engine::StrataEngineBuilder;
use strata_server::{create_storage, Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,strata=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Strata Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/strata.toml".to_string());

    let server_config = if std::path::Path::new(&config_path).exists() {
        info!("Loading configuration from {}", config_path);
        ServerConfig::from_file(&config_path)
            .with_context(|| format!("reading {config_path}"))?
    } else {
        info!("Using default configuration");
        ServerConfig::default()
    };

    let storage = create_storage(&server_config).context("opening storage")?;

    let engine = StrataEngineBuilder::new()
        .with_config(server_config.engine.clone())
        .with_storage(storage)
        .build()?;

    let server = Server::new(server_config, Arc::new(engine));
    server.start().await?;

    Ok(())
}

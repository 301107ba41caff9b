//! Roundbet server
//!
//! Loads configuration, opens the store, starts the round drivers and serves
//! the HTTP API until a shutdown signal arrives.

use clap::Parser;
use roundbet::{
    api::ApiServer,
    config::{ConfigLoader, EngineConfig, StorageBackend},
    errors::EngineResult,
    factory::PlatformFactory,
};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

/// Round-based betting engine
#[derive(Parser, Debug)]
#[command(name = "roundbet")]
#[command(about = "Round-based betting and settlement engine")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for the RocksDB store
    #[arg(short, long)]
    db_path: Option<String>,

    /// API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Keep all state in memory
    #[arg(long)]
    memory: bool,

    /// Start from the development preset
    #[arg(long)]
    dev: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    let args = Args::parse();

    let base = if args.dev {
        EngineConfig::development()
    } else {
        EngineConfig::production()
    };
    let mut loader = ConfigLoader::new().with_base(base);
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(dir) = args.db_path {
        config.storage.data_directory = dir;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_filter)),
        )
        .init();

    if let Some(path) = args.dump_config {
        ConfigLoader::save(&config, &path.to_string_lossy())?;
        tracing::info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    tracing::info!(
        backend = ?config.storage.backend,
        wingo_rooms = ?config.game.wingo_rooms,
        nine_rooms = ?config.game.nine_rooms,
        "Starting roundbet"
    );

    let platform = Arc::new(PlatformFactory::create(config.clone()).await?);
    platform.spawn_workers();

    if config.api.enabled {
        ApiServer::new(config.api.clone(), platform.clone()).run().await?;
    } else {
        tracing::info!("API disabled, running round drivers only");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to wait for Ctrl+C");
        }
    }

    platform.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

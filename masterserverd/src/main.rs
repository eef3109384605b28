mod config;
mod registry;
mod registry_manager;
mod probe;
mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::registry::db::RegistryDb;
use crate::registry_manager::RegistryHandle;
use crate::config::Config;
use crate::probe::TcpProber;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("masterserverd=info"))
        )
        .init();

    tracing::info!("Starting masterserverd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/masterserver/masterserverd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = RegistryDb::open(&config.registry.db_path)?;
    tracing::info!("Opened database at {:?}", config.registry.db_path);

    let initial_servers = db.scan_live(config.registry.expire_after_secs)?;
    let initial_hash = registry::hash::compute_hash(&initial_servers);
    tracing::info!("{} server(s) on record, list hash {}", initial_servers.len(), initial_hash);

    let (hash_tx, hash_rx) = watch::channel(initial_hash);

    let registry_handle = RegistryHandle::spawn(db, hash_tx, config.registry.expire_after_secs);

    let cancel = CancellationToken::new();

    // Background expiry sweep
    let sweep_cancel = cancel.clone();
    let sweep_config = config.registry.clone();
    let sweep_registry = registry_handle.clone();
    let sweep_handle = tokio::spawn(async move {
        if let Err(e) = registry_manager::run(sweep_registry, sweep_config, sweep_cancel).await {
            tracing::error!("Registry sweeper error: {}", e);
        }
    });

    let listen = config.api.listen.clone();
    let app_state = api::routes::AppState {
        registry: registry_handle.clone(),
        prober: Arc::new(TcpProber),
        hash_rx,
        config: Arc::new(config),
    };
    let app = api::routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;

    tracing::info!("API listening on {}", listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(sweep_handle, server_handle);

    if let Err(e) = registry_handle.shutdown().await {
        tracing::error!("Failed to shutdown registry: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

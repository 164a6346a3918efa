//! namegnome-serve - media rename planning service
//!
//! REST service exposing the scan/plan/apply pipeline. Provider API keys
//! come from the environment; the cache database location follows
//! `NAMEGNOME_CACHE_PATH` (or the TOML config).

use anyhow::Result;
use namegnome_common::config::AppConfig;
use namegnome_common::db;
use namegnome_common::events::EventBus;
use namegnome_serve::providers::gateway::ProviderGateway;
use namegnome_serve::providers::ProviderRegistry;
use namegnome_serve::{build_router, AppState};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting namegnome-serve");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::resolve(None, false)?;
    info!("Cache database: {}", config.cache_path.display());

    let db_pool = db::init_cache_pool(&config.cache_path).await?;
    info!("Cache database ready");

    let registry = ProviderRegistry::from_env()?;
    let gateway = Arc::new(ProviderGateway::new(
        db_pool.clone(),
        registry,
        config.providers.clone(),
        config.offline,
    ));
    info!("Provider registry initialised");

    let event_bus = EventBus::new(256);
    let bind_address = config.bind_address.clone();
    let state = AppState::new(db_pool, event_bus, gateway, config);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/healthz", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

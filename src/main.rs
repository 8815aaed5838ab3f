//! Items API - Main entry point
//!
//! Loads configuration from the environment, installs structured logging
//! (with optional shipping to OpenSearch) and serves the HTTP API until
//! Ctrl-C, then flushes the log shipper.

use anyhow::{Context, Result};
use items_api::{
    build_router,
    core::{init_logging, AppConfig, HttpMetrics, LogShipper},
    AppState, ItemService,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let shipper = Arc::new(LogShipper::from_config(&config.shipper));
    init_logging(&config.logging, shipper.clone()).context("failed to install logging")?;

    tracing::info!(
        shipping = shipper.is_enabled(),
        stdout = config.logging.stdout,
        middleware_order = ?config.middleware_order,
        "Logging initialized"
    );

    let metrics = HttpMetrics::new().context("failed to register metrics")?;
    let state = Arc::new(AppState::new(ItemService::new(), metrics));
    let app = build_router(state, &config);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("Starting Items API on {}", addr);
    tracing::info!("Items API: /items, /items/:id");
    tracing::info!("Metrics endpoint: /metrics");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped, flushing logs");
    shipper.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

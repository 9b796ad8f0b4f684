use covid_backend::config;
use covid_backend::logging;
use covid_backend::module::scheduled::RefreshScheduler;
use covid_backend::module::stats::{ScraperClient, SnapshotStore};
use covid_backend::service;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::read_config(config::DEFAULT_CONFIG_PATH).context("Failed to load configuration")?;

    // Initialize logging
    let _logging_guard = logging::init_logging(&config.log_dir, "covid-backend", &config.log_level)?;

    tracing::info!("COVID-19 statistics backend starting...");
    match &config.source {
        Some(path) => tracing::info!("Configuration loaded from {}", path.display()),
        None => tracing::info!("No {} found, running with defaults", config::DEFAULT_CONFIG_PATH),
    }

    let client = ScraperClient::from_config(config)?;
    tracing::info!("Scraping provider endpoint: {}", client.endpoint());

    let store = Arc::new(SnapshotStore::new(config.country_field.as_str()));

    // First refresh runs right away, then every interval
    let scheduler = RefreshScheduler::new(
        Arc::new(client),
        store.clone(),
        config.refresh_interval(),
        config.refresh_timeout(),
    )
    .spawn();

    let listener = service::bind(&config.server_address()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(service::run_server(
        listener,
        service::build_router(store),
        shutdown_rx,
        config.shutdown_grace(),
    ));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received.");
        }
        result = &mut server => {
            tracing::error!("Statistics API exited unexpectedly");
            scheduler.shutdown(config.shutdown_grace()).await;
            return Ok(result??);
        }
    }

    shutdown_tx.send_replace(true);
    scheduler.shutdown(config.shutdown_grace()).await;
    server.await??;

    tracing::info!("COVID-19 statistics backend stopped");
    Ok(())
}

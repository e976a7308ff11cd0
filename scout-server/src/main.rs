use anyhow::{Context, Result};
use chrono::Utc;
use scout_api::{observability::init_logging, AppState};
use scout_workflow::{HttpScrapeProvider, InMemoryResultSink, RunDriver};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{error, info};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::ServerConfig::load().context("loading configuration")?;

    init_logging(config.log.clone())
        .map_err(|err| anyhow::anyhow!("failed to initialize logging: {}", err))?;
    info!("Starting Scout server");

    let provider = HttpScrapeProvider::new(config.provider.clone())
        .context("building scrape provider client")?;
    info!(base_url = %config.provider.base_url, "Scrape provider configured");

    let driver = RunDriver::new(
        Arc::new(provider),
        Arc::new(InMemoryResultSink::new()),
        config.driver.clone(),
    );

    tokio::spawn(evict_finished(
        driver.clone(),
        config.retention(),
        config.eviction_interval(),
    ));

    let app = scout_api::routes(AppState::new(driver, config.limits));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("parsing listen address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Drops finished pipelines and their stored records once they are older
/// than `retention`.
async fn evict_finished(driver: RunDriver, retention: chrono::Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            continue;
        };
        let evicted = driver.evict_finished_before(cutoff).await;
        if evicted > 0 {
            info!(evicted, "evicted finished pipelines");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

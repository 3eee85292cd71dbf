use std::path::PathBuf;

use keycloak_metrics::config::Configuration;
use keycloak_metrics::{app, initialize_state, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(err) = telemetry::setup_logging() {
        eprintln!("failed to install logger: {err}");
    }

    let mut config = Configuration::default();
    if let Ok(path) = std::env::var("CONFIG_PATH") {
        config = config.path(PathBuf::from(path));
    }
    let config = config.read();
    let address = config.socket_address()?;

    let state = initialize_state(config).await?;
    let listener = TcpListener::bind(address).await?;
    tracing::info!(%address, "metrics server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down");
}

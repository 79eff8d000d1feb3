//! Service entry point: configuration, listeners, shutdown.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use speculos_farm::{Config, Farm, RealtimeServer, api};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configuration is checked before any listener binds.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("speculos-farm: {error}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "Farm terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> speculos_farm::Result<()> {
    let farm = Farm::new(&config);

    let realtime = RealtimeServer::bind(config.ws_port, farm.clone()).await?;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.http_port)).await?;
    info!(
        http_port = config.http_port,
        ws_port = realtime.port(),
        "Speculos farm listening"
    );

    axum::serve(listener, api::router(farm.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    realtime.shutdown();
    farm.destroy_all().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(error = %error, "Failed to listen for shutdown signal");
    }
}

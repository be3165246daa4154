use std::sync::Arc;

use tender_sniper::{app, build_service, AppConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise structured logging. Reads RUST_LOG environment variable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Fatal on missing required settings.
    let config = AppConfig::from_env()?;
    let service = build_service(&config).await?;

    // The monitoring loop runs next to the HTTP server for its whole
    // lifetime.
    let monitor = Arc::clone(&service.monitor);
    tokio::spawn(async move {
        monitor.run().await;
    });

    let router = app(service.state);
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

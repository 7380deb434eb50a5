mod config;
mod error;
mod imaging;
mod interpret;
mod models;
mod prompt;
mod routes;
mod vision;

use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::Config, prompt::ANALYSIS_PROMPT, routes::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    match config.model.credentials() {
        Some((endpoint, _)) => tracing::info!(
            "Using deployment '{}' at {} (prompt {})",
            config.model.deployment,
            endpoint,
            ANALYSIS_PROMPT.version
        ),
        None => tracing::warn!(
            "⚠️ AZURE_OPENAI_ENDPOINT / AZURE_OPENAI_API_KEY not set; /api/analyze will answer 500 until configured"
        ),
    }
    tracing::info!(
        max_upload_bytes = config.max_upload_bytes,
        target_dimension = config.target_dimension,
        target_quality = config.target_quality,
        production = config.production,
        "Pipeline settings"
    );

    let port = config.port;
    let state = AppState::from_config(config)?;
    let app = routes::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

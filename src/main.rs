//! avrelay server
//!
//! Usage: avrelay [CONFIG_FILE]
//!
//! Without a config file the server binds to 0.0.0.0:8089 with transcoding
//! disabled.
//!
//! ## Publishing
//!
//!   ffmpeg -re -i movie.flv -c copy -f flv -method POST http://localhost:8089/movie
//!
//! ## Playing
//!
//!   ffplay http://localhost:8089/movie

use anyhow::Context;
use avrelay::{HttpServer, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => RelayConfig::default(),
    };

    tracing::info!(
        bind = %config.http.bind_addr,
        transcode = config.transcode.enabled,
        codec = %config.transcode.codec,
        "Starting avrelay"
    );

    let server = HttpServer::new(&config);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

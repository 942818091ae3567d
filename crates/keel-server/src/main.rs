//! Keel DB Server
//!
//! Binary entry point for the store's HTTP API.
//!
//! ## Flags
//! - `--port`: port to listen on (default: 8083)
//! - `--dir`: directory holding the segment files (default: ./data)
//! - `--segment-size`: rotation threshold in bytes (default: 10MB)
//!
//! ## Logging
//! Controlled via `RUST_LOG` (default level: info).
//!
//! On SIGINT/SIGTERM the server stops accepting requests, then closes the
//! store so the writer drains and the active segment is synced.

use std::sync::Arc;

use clap::Parser;
use keel_server::{create_router, AppState};
use keel_store::{Store, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keel-server", about = "Append-only key/value store with an HTTP surface")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8083)]
    port: u16,

    /// Directory holding the store's segment files.
    #[arg(long, default_value = "./data")]
    dir: String,

    /// Segment rotation threshold in bytes.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    segment_size: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = StoreConfig {
        segment_max_size: args.segment_size,
        ..StoreConfig::default()
    };
    let store = Arc::new(Store::open(&args.dir, config).await?);
    let router = create_router(AppState {
        store: store.clone(),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(dir = %args.dir, "DB HTTP API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining writes before exit");
    store.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

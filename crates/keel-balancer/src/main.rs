//! Keel Load Balancer
//!
//! Binary entry point. Starts the health prober, then serves a router
//! whose only job is to dispatch every inbound request to a healthy
//! backend by path hash.
//!
//! ## Flags
//! - `--port`: port to listen on (default: 8090)
//! - `--trace`: include the chosen backend in an `lb-from` response header
//! - `--backends`: comma-separated backend pool
//!   (default: server1:8080,server2:8080,server3:8080)
//! - `--probe-interval-secs`: seconds between probe cycles (default: 10)

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use keel_balancer::dispatcher::{dispatch, Dispatcher};
use keel_balancer::prober::HealthProber;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keel-balancer", about = "Path-affinity HTTP load balancer")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// Include tracing information in responses.
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Comma-separated pool of backend addresses.
    #[arg(
        long,
        default_value = "server1:8080,server2:8080,server3:8080",
        value_delimiter = ','
    )]
    backends: Vec<String>,

    /// Seconds between health-probe cycles.
    #[arg(long, default_value_t = 10)]
    probe_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let prober = Arc::new(HealthProber::new(args.backends));
    let dispatcher = Arc::new(Dispatcher::new(prober.clone(), args.trace));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let prober_task = tokio::spawn(
        prober
            .clone()
            .run(Duration::from_secs(args.probe_interval_secs), shutdown_rx),
    );

    let router = Router::new().fallback(dispatch).with_state(dispatcher);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        backends = prober.backends().len(),
        trace = args.trace,
        "load balancer listening on {}",
        addr
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = prober_task.await;
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

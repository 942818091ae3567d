//! Demo Application Replica
//!
//! A stateless backend meant to sit behind the load balancer. It exposes a
//! liveness endpoint for the prober, proxies reads to the DB server, and
//! registers itself in the store on startup by writing today's date under
//! its own name.
//!
//! ## Endpoints
//! - `GET /health`: 200 `OK`, or 500 `FAILURE` when the env var
//!   `CONF_HEALTH_FAILURE=true` (lets integration setups take a replica
//!   out of rotation)
//! - `GET /api/v1/some-data?key=<k>`: proxies `GET <db>/db/<k>`
//!
//! ## Flags
//! - `--port`: port to listen on (default: 8080)
//! - `--db-url`: base URL of the DB server (default: http://dbserver:8083)
//!
//! The replica name comes from `SERVER_NAME`, falling back to `HOSTNAME`.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "app", about = "Demo application replica fronted by the load balancer")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Base URL of the DB server.
    #[arg(long, default_value = "http://dbserver:8083")]
    db_url: String,
}

#[derive(Clone)]
struct AppClient {
    client: reqwest::Client,
    db_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let app = AppClient {
        client: reqwest::Client::new(),
        db_url: args.db_url,
    };

    tokio::spawn(register_self(app.clone()));

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/some-data", get(some_data))
        .with_state(app);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("app replica listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn health() -> (StatusCode, &'static str) {
    if std::env::var("CONF_HEALTH_FAILURE").as_deref() == Ok("true") {
        (StatusCode::INTERNAL_SERVER_ERROR, "FAILURE")
    } else {
        (StatusCode::OK, "OK")
    }
}

async fn some_data(
    State(app): State<AppClient>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(key) = params.get("key") else {
        return (StatusCode::BAD_REQUEST, "key parameter is missing").into_response();
    };

    let url = format!("{}/db/{}", app.db_url, key);
    let response = match app
        .client
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, "failed to reach db server");
            return (StatusCode::INTERNAL_SERVER_ERROR, "db server unreachable").into_response();
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    match response.bytes().await {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(%err, "failed to read db response");
            (StatusCode::INTERNAL_SERVER_ERROR, "db response failed").into_response()
        }
    }
}

/// Write today's date under this replica's name once the stack is up.
async fn register_self(app: AppClient) {
    tokio::time::sleep(Duration::from_secs(2)).await;

    let name = std::env::var("SERVER_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let value = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let url = format!("{}/db/{}", app.db_url, name);

    match app
        .client
        .post(&url)
        .json(&serde_json::json!({ "value": value }))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            info!(name = %name, value = %value, "registered replica in db");
        }
        Ok(response) => {
            warn!(name = %name, status = %response.status(), "db rejected registration");
        }
        Err(err) => {
            warn!(name = %name, %err, "failed to register replica in db");
        }
    }
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

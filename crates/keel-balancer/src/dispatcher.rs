//! Path-Affinity Dispatcher
//!
//! Selects a backend by hashing the request path with CRC-32 (IEEE) and
//! taking the hash modulo the healthy-set size, then forwards the request
//! and copies the response back. The same path always maps to the same
//! slot within a fixed healthy-set; when the set changes, affinity may
//! remap.
//!
//! An empty healthy-set and any forwarding failure both answer 503. A
//! failed request is never retried on another backend: the path hash
//! names exactly one target.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use tracing::{error, info};

use crate::prober::HealthProber;

/// Deadline for a forwarded request.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Response header naming the chosen backend when tracing is enabled.
const TRACE_HEADER: &str = "lb-from";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct Dispatcher {
    prober: Arc<HealthProber>,
    client: reqwest::Client,
    trace: bool,
}

impl Dispatcher {
    pub fn new(prober: Arc<HealthProber>, trace: bool) -> Self {
        Self {
            prober,
            client: reqwest::Client::new(),
            trace,
        }
    }
}

/// Deterministic path-hash selection over a fixed healthy-set.
pub fn choose_backend<'a>(path: &str, healthy: &'a [String]) -> Option<&'a str> {
    if healthy.is_empty() {
        return None;
    }
    let hash = crc32fast::hash(path.as_bytes());
    Some(healthy[hash as usize % healthy.len()].as_str())
}

/// Fallback handler: routes any inbound request to a healthy backend.
pub async fn dispatch(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    let healthy = dispatcher.prober.healthy_set().await;
    let path = request.uri().path().to_string();

    let Some(backend) = choose_backend(&path, &healthy) else {
        info!(path = %path, "no healthy backends available");
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    };
    let backend = backend.to_string();

    info!(path = %path, backend = %backend, "routing request");
    match forward(&dispatcher, &backend, request).await {
        Ok(response) => response,
        Err(err) => {
            error!(backend = %backend, %err, "failed to forward request");
            status_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn forward(
    dispatcher: &Dispatcher,
    backend: &str,
    request: Request,
) -> Result<Response, BoxError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{backend}{path_and_query}");

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())?;
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await?;

    let mut upstream = dispatcher
        .client
        .request(method, &url)
        .timeout(FORWARD_TIMEOUT)
        .body(body_bytes);
    for (name, value) in parts.headers.iter() {
        // The upstream host is the backend, not whatever the client sent.
        if name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }

    let response = upstream.send().await?;

    let status = StatusCode::from_u16(response.status().as_u16())?;
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers().iter() {
        let name = name.as_str();
        // Hop-by-hop headers do not survive the proxy.
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        builder = builder.header(name, value.as_bytes());
    }
    if dispatcher.trace {
        builder = builder.header(TRACE_HEADER, backend);
    }

    let body = response.bytes().await?;
    Ok(builder.body(Body::from(body))?)
}

fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(backends: &[&str]) -> Vec<String> {
        backends.iter().map(|b| b.to_string()).collect()
    }

    #[test]
    fn test_same_path_same_backend() {
        let healthy = pool(&["s1:8080", "s2:8080", "s3:8080"]);
        let first = choose_backend("/some/path", &healthy).unwrap();
        let second = choose_backend("/some/path", &healthy).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_set_yields_none() {
        assert_eq!(choose_backend("/some/path", &[]), None);
    }

    #[test]
    fn test_single_backend_gets_everything() {
        let healthy = pool(&["lonely:8080"]);
        for path in ["/", "/a", "/b/c", "/some/path?x=1"] {
            assert_eq!(choose_backend(path, &healthy), Some("lonely:8080"));
        }
    }

    #[test]
    fn test_selection_uses_crc32_modulo() {
        let healthy = pool(&["s1:8080", "s2:8080", "s3:8080"]);
        let path = "/some/path";
        let expected = crc32fast::hash(path.as_bytes()) as usize % healthy.len();
        assert_eq!(
            choose_backend(path, &healthy),
            Some(healthy[expected].as_str())
        );
    }

    #[test]
    fn test_different_paths_can_spread() {
        let healthy = pool(&["s1:8080", "s2:8080", "s3:8080"]);
        let chosen: std::collections::HashSet<_> = (0..32)
            .map(|i| choose_backend(&format!("/path/{i}"), &healthy).unwrap())
            .collect();
        assert!(chosen.len() > 1, "32 distinct paths all hashed to one slot");
    }
}

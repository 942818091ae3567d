//! Balancer integration: real loopback backends, a prober cycle, and
//! dispatch through the router via `tower::ServiceExt`.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use keel_balancer::dispatcher::dispatch;
use keel_balancer::{Dispatcher, HealthProber};
use tower::ServiceExt;

/// Spawn a backend that answers its name to everything and 200 to
/// `/health`. Returns its `addr:port`.
async fn spawn_backend(name: &'static str) -> String {
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .fallback(move || async move { name });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

/// Spawn a backend whose `/health` always answers 500.
async fn spawn_sick_backend() -> String {
    let app = Router::new().route(
        "/health",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "FAILURE") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

fn balancer_router(prober: Arc<HealthProber>, trace: bool) -> Router {
    let dispatcher = Arc::new(Dispatcher::new(prober, trace));
    Router::new().fallback(dispatch).with_state(dispatcher)
}

#[tokio::test]
async fn probe_cycle_publishes_only_live_backends() {
    let alive = spawn_backend("alive").await;
    let dead = "127.0.0.1:9".to_string(); // nothing listens on the discard port

    let prober = HealthProber::new(vec![alive.clone(), dead]);
    assert!(prober.healthy_set().await.is_empty());

    prober.probe_cycle().await;
    assert_eq!(*prober.healthy_set().await, vec![alive]);
}

#[tokio::test]
async fn probe_cycle_excludes_unhealthy_status() {
    let alive = spawn_backend("alive").await;
    let sick = spawn_sick_backend().await;

    let prober = HealthProber::new(vec![sick, alive.clone()]);
    prober.probe_cycle().await;
    assert_eq!(*prober.healthy_set().await, vec![alive]);
}

#[tokio::test]
async fn probe_cycle_recovers_backends() {
    let alive = spawn_backend("alive").await;
    let prober = HealthProber::new(vec![alive.clone()]);

    prober.probe_cycle().await;
    assert_eq!(prober.healthy_set().await.len(), 1);

    // The set published by one cycle stays put until the next barrier.
    let snapshot = prober.healthy_set().await;
    prober.probe_cycle().await;
    assert_eq!(*snapshot, vec![alive.clone()]);
    assert_eq!(*prober.healthy_set().await, vec![alive]);
}

#[tokio::test]
async fn same_path_routes_to_same_backend() {
    let one = spawn_backend("one").await;
    let two = spawn_backend("two").await;

    let prober = Arc::new(HealthProber::new(vec![one, two]));
    prober.probe_cycle().await;
    let router = balancer_router(prober, true);

    let mut seen = HashSet::new();
    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/some/path")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let from = response
            .headers()
            .get("lb-from")
            .expect("trace header missing")
            .to_str()
            .unwrap()
            .to_string();
        seen.insert(from);
    }
    assert_eq!(seen.len(), 1, "one path must stick to one backend");
}

#[tokio::test]
async fn single_backend_pool_serves_any_path() {
    let lonely = spawn_backend("lonely").await;
    let prober = Arc::new(HealthProber::new(vec![lonely.clone()]));
    prober.probe_cycle().await;
    let router = balancer_router(prober, true);

    for path in ["/", "/a", "/deep/nested/path"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("lb-from").unwrap().to_str().unwrap(),
            lonely
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"lonely");
    }
}

#[tokio::test]
async fn empty_healthy_set_is_503() {
    let prober = Arc::new(HealthProber::new(vec!["127.0.0.1:9".to_string()]));
    prober.probe_cycle().await;
    let router = balancer_router(prober, false);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn forward_failure_is_503() {
    // Publish a backend that then refuses connections: pretend it was
    // healthy a cycle ago by probing a live listener and dropping it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    let app = Router::new().route("/health", get(|| async { "OK" }));
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let prober = Arc::new(HealthProber::new(vec![addr]));
    prober.probe_cycle().await;
    assert_eq!(prober.healthy_set().await.len(), 1);

    server.abort();
    let _ = server.await;

    let router = balancer_router(prober, false);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/some/path")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn trace_header_absent_when_disabled() {
    let one = spawn_backend("one").await;
    let prober = Arc::new(HealthProber::new(vec![one]));
    prober.probe_cycle().await;
    let router = balancer_router(prober, false);

    let response = router
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("lb-from").is_none());
}

#[tokio::test]
async fn request_bodies_reach_the_backend() {
    // Echo backend: answers with the body it received.
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .fallback(|body: String| async move { body });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let prober = Arc::new(HealthProber::new(vec![addr]));
    prober.probe_cycle().await;
    let router = balancer_router(prober, false);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/echo")
                .body(Body::from("payload-123"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"payload-123");
}

//! Keel DB HTTP Surface
//!
//! A thin CRUD layer over [`keel_store::Store`]:
//!
//! - `GET /db/<key>` → `{"key": .., "value": ..}` or 404
//! - `POST /db/<key>` with `{"value": "<string>"}` → 201
//! - `DELETE /db/<key>` → 204
//! - `GET /health` → 200 `OK`
//!
//! Keys are the full URL suffix after `/db/`, so they may contain slashes.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use keel_store::Store;

pub mod handlers;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
}

/// Create the router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/db/*key",
            get(handlers::get_value)
                .post(handlers::put_value)
                .delete(handlers::delete_value),
        )
        .route(
            "/db",
            get(handlers::missing_key)
                .post(handlers::missing_key)
                .delete(handlers::missing_key),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

//! Key/value endpoint handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use keel_core::Error;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct PutBody {
    value: String,
}

pub async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<KeyValue>, StatusCode> {
    if key.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    match state.store.get(&key).await {
        Ok(value) => Ok(Json(KeyValue { key, value })),
        Err(Error::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!(key = %key, %err, "get failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn put_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: String,
) -> StatusCode {
    if key.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    // Parse by hand so any malformed body maps to 400.
    let payload: PutBody = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    match state.store.put(key, payload.value).await {
        Ok(()) => StatusCode::CREATED,
        Err(err) => {
            error!(%err, "put failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn delete_value(State(state): State<AppState>, Path(key): Path<String>) -> StatusCode {
    if key.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match state.store.delete(key).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            error!(%err, "delete failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn missing_key() -> StatusCode {
    StatusCode::BAD_REQUEST
}

pub async fn health_check() -> &'static str {
    "OK"
}

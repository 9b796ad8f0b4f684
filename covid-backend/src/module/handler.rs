//! HTTP handlers for the statistics API
//!
//! | Method | Path | Answer |
//! |--------|------|--------|
//! | `GET` | `/ping` | `{"alive":true}` |
//! | `GET` | `/v1` | whole dataset, refresh sentinel last |
//! | `GET` | `/v1/{country}` | one country (or World), with `Last Update` |
//! | `OPTIONS` | any | empty `200` allowing the `Content-Type` header |

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::sync::Arc;

use super::stats::{SnapshotStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to retrieve COVID-19 info")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Store(e) => tracing::warn!("Statistics query rejected: {}", e),
            Self::Serialization(e) => tracing::error!("Failed to encode statistics: {}", e),
        }
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

fn json_response<T: Serialize + ?Sized>(value: &T) -> Result<Response, ApiError> {
    let body = serde_json::to_vec(value)?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response())
}

/// Liveness check
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "alive": true })))
}

/// `GET /v1`
pub async fn all_countries(State(store): State<Arc<SnapshotStore>>) -> Result<Response, ApiError> {
    let dataset = store.query_all()?;
    json_response(&*dataset)
}

/// `GET /v1/{country}`
///
/// The segment is decoded lossily: a name that is not valid UTF-8 still
/// gets an answer (the World record).
pub async fn country(State(store): State<Arc<SnapshotStore>>, uri: Uri) -> Result<Response, ApiError> {
    let segment = uri.path().rsplit('/').next().unwrap_or_default();
    let country = percent_decode_str(segment).decode_utf8_lossy();
    let record = store.query_country(&country)?;
    json_response(&record)
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Answer every `OPTIONS` request before routing.
pub async fn answer_preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return (
            StatusCode::OK,
            [(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"))],
        )
            .into_response();
    }
    next.run(request).await
}

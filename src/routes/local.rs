//! Local object serving
//!
//! Serves objects held by the in-memory backend so its public and signed
//! links work like real object-store URLs. Disabled (404) for other backends.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::debug;

use crate::models::AppState;
use crate::storage::{AccessMode, SignatureParams};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/local/{bucket}/{*key}", get(serve_object))
        .with_state(state)
}

async fn serve_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<SignatureParams>,
) -> AppResult<Response> {
    let store = state
        .local_store
        .as_ref()
        .ok_or_else(|| AppError::NotFound("local object serving is disabled".to_string()))?;

    let object = store.resolve(&bucket, &key, &params).await?;
    debug!(bucket = %bucket, key = %key, size = object.body.len(), "Serving local object");

    let cache_control = match object.access {
        AccessMode::Public => "public, max-age=60",
        AccessMode::Private => "private, no-store",
    };

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, cache_control.to_string()),
        ],
        object.body,
    )
        .into_response())
}

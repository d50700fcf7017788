//! File API
//!
//! JSON counterparts of the page actions:
//! - `POST /api/files` - multipart upload (`file`, optional `private`)
//! - `GET /api/files` - one page of objects under a prefix, with links
//! - `GET /api/files/public-url` - public URL for a key
//! - `GET /api/files/signed-url` - time-limited URL for a key

use std::time::Duration;

use axum::{
    extract::{Multipart, Query, State},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AppState, ListQuery, ListingResponse, PublicUrlQuery, SignedUrlQuery, UploadResponse,
    UrlResponse,
};
use crate::storage::{infer_content_type, resolve_links, upload_key, AccessMode};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/files", get(list_files).post(upload_file))
        .route("/api/files/public-url", get(public_url))
        .route("/api/files/signed-url", get(signed_url))
        .with_state(state)
}

/// Fields of an upload form.
#[derive(Debug)]
pub struct UploadForm {
    pub file_name: String,
    pub body: Bytes,
    pub private: bool,
}

/// Lenient checkbox/flag reading: `on`, `true`, `1` and `yes` are set.
pub(crate) fn is_checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "yes"
    )
}

/// Read `file` and `private` out of a multipart body.
///
/// A missing file, an unnamed file or an empty file is a client error.
pub async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut file: Option<(String, Bytes)> = None;
    let mut private = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let body = field.bytes().await?;
                file = Some((file_name, body));
            }
            "private" => {
                let value = field.text().await?;
                private = is_checked(&value);
            }
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    let (file_name, body) =
        file.ok_or_else(|| AppError::InvalidRequest("no file was provided".to_string()))?;

    if file_name.trim().is_empty() {
        return Err(AppError::InvalidRequest("file has no name".to_string()));
    }
    if body.is_empty() {
        return Err(AppError::InvalidRequest(format!("{} is empty", file_name)));
    }

    Ok(UploadForm {
        file_name,
        body,
        private,
    })
}

/// Upload a parsed form and describe where the object landed.
pub async fn store_upload(state: &AppState, form: UploadForm) -> AppResult<UploadResponse> {
    let upload_id = Uuid::new_v4();
    let access = AccessMode::from_private_flag(form.private);
    let key = upload_key(&state.config.storage.upload_prefix, access, &form.file_name)?;
    let content_type = infer_content_type(&key);
    let size = form.body.len() as u64;
    let bucket = state.bucket();

    info!(
        upload_id = %upload_id,
        bucket = %bucket,
        key = %key,
        size,
        access = %access,
        "Uploading file"
    );

    state
        .storage
        .put(bucket, &key, form.body, &content_type, access)
        .await?;

    let url = match access {
        AccessMode::Public => state.storage.public_url(bucket, &key)?,
        AccessMode::Private => {
            state
                .storage
                .signed_url(bucket, &key, state.config.storage.signed_url_ttl())
                .await?
        }
    };

    info!(upload_id = %upload_id, key = %key, "Upload complete");

    Ok(UploadResponse {
        upload_id,
        bucket: bucket.to_string(),
        key,
        size,
        content_type,
        access,
        url,
    })
}

async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let form = read_upload_form(multipart).await?;
    let response = store_upload(&state, form).await?;
    Ok(Json(response))
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListingResponse>> {
    query.validate()?;

    let prefix = query
        .prefix
        .unwrap_or_else(|| state.config.storage.upload_prefix.clone());
    let ttl = query
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.storage.signed_url_ttl());
    let bucket = state.bucket();

    let objects = state.storage.list_by_prefix(bucket, &prefix).await?;
    let objects = resolve_links(
        state.storage.as_ref(),
        bucket,
        objects,
        query.reveal_private.unwrap_or(false),
        ttl,
    )
    .await?;

    Ok(Json(ListingResponse {
        bucket: bucket.to_string(),
        prefix,
        objects,
    }))
}

async fn public_url(
    State(state): State<AppState>,
    Query(query): Query<PublicUrlQuery>,
) -> AppResult<Json<UrlResponse>> {
    query.validate()?;

    let url = state.storage.public_url(state.bucket(), &query.key)?;
    Ok(Json(UrlResponse {
        key: query.key,
        url,
        expires_in_secs: None,
    }))
}

async fn signed_url(
    State(state): State<AppState>,
    Query(query): Query<SignedUrlQuery>,
) -> AppResult<Json<UrlResponse>> {
    query.validate()?;

    let ttl = query
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.storage.signed_url_ttl());
    let url = state
        .storage
        .signed_url(state.bucket(), &query.key, ttl)
        .await?;

    Ok(Json(UrlResponse {
        key: query.key,
        url,
        expires_in_secs: Some(ttl.as_secs()),
    }))
}

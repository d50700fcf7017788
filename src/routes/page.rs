//! Upload page
//!
//! Server-rendered page with an upload form and a listing of the bucket.
//! - `GET /` - listing, `?prefix=` narrows it, `?reveal=true` shows signed
//!   links for private files
//! - `POST /upload` - form upload, redirects back to the listing

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use handlebars::{Handlebars, TemplateError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::form_urlencoded;

use super::files::{is_checked, read_upload_form, store_upload};
use crate::models::{AppState, UploadResponse};
use crate::storage::{resolve_links, LinkKind, ObjectLink};
use crate::types::{AppError, AppResult};

const INDEX_TEMPLATE: &str = "index";
const ERROR_TEMPLATE: &str = "error";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .with_state(state)
}

/// Page templates, compiled once at startup.
pub fn templates() -> Result<Handlebars<'static>, TemplateError> {
    let mut engine = Handlebars::new();
    engine.register_template_string(INDEX_TEMPLATE, include_str!("../../templates/index.hbs"))?;
    engine.register_template_string(ERROR_TEMPLATE, include_str!("../../templates/error.hbs"))?;
    Ok(engine)
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub prefix: Option<String>,
    pub reveal: Option<String>,
    pub uploaded: Option<String>,
}

#[derive(Debug, Serialize)]
struct Row {
    key: String,
    file_name: String,
    size: String,
    last_modified: String,
    content_type: String,
    access: String,
    url: Option<String>,
    link_label: String,
}

impl From<ObjectLink> for Row {
    fn from(link: ObjectLink) -> Self {
        let link_label = match &link.link {
            LinkKind::Public => "Public link".to_string(),
            LinkKind::Signed { expires_in_secs } => {
                format!("Signed link ({}s)", expires_in_secs)
            }
            LinkKind::Hidden => "hidden".to_string(),
        };

        Self {
            file_name: link.object.file_name().to_string(),
            size: format_size(link.object.size),
            last_modified: link
                .object
                .last_modified
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "-".to_string()),
            content_type: link.object.content_type,
            access: link.object.access.to_string(),
            url: link.url,
            key: link.object.key,
            link_label,
        }
    }
}

/// Human-readable byte count.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn page_href(prefix: &str, reveal: bool) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("prefix", prefix)
        .append_pair("reveal", if reveal { "true" } else { "false" })
        .finish();
    format!("/?{}", query)
}

async fn render_index(state: &AppState, query: PageQuery) -> AppResult<String> {
    let prefix = query
        .prefix
        .unwrap_or_else(|| state.config.storage.upload_prefix.clone());
    let reveal = query.reveal.as_deref().is_some_and(is_checked);
    let ttl = state.config.storage.signed_url_ttl();
    let bucket = state.bucket();

    // Any listing or signing failure aborts the whole render.
    let objects = state.storage.list_by_prefix(bucket, &prefix).await?;
    let links = resolve_links(state.storage.as_ref(), bucket, objects, reveal, ttl).await?;
    let rows: Vec<Row> = links.into_iter().map(Row::from).collect();

    let context = serde_json::json!({
        "bucket": bucket,
        "prefix": prefix,
        "reveal": reveal,
        "ttl_secs": ttl.as_secs(),
        "toggle_href": page_href(&prefix, !reveal),
        "uploaded": query.uploaded,
        "rows": rows,
    });

    Ok(state.templates.render(INDEX_TEMPLATE, &context)?)
}

fn error_page(state: &AppState, err: AppError) -> Response {
    let status = err.status_code();
    error!(status = %status, "Page request failed: {}", err);

    let context = serde_json::json!({
        "status": status.as_u16(),
        "summary": err.summary(),
        "details": err.to_string(),
    });

    match state.templates.render(ERROR_TEMPLATE, &context) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(render_err) => {
            error!("Failed to render error page: {}", render_err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn index(State(state): State<AppState>, Query(query): Query<PageQuery>) -> Response {
    match render_index(&state, query).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => error_page(&state, e),
    }
}

async fn handle_upload(state: &AppState, multipart: Multipart) -> AppResult<UploadResponse> {
    let form = read_upload_form(multipart).await?;
    store_upload(state, form).await
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Response {
    match handle_upload(&state, multipart).await {
        Ok(stored) => {
            info!(key = %stored.key, "Form upload stored");
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("uploaded", &stored.key)
                .finish();
            Redirect::to(&format!("/?{}", query)).into_response()
        }
        Err(e) => error_page(&state, e),
    }
}

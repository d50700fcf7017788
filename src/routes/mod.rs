//! HTTP routes
//!
//! - `/` and `/upload` - server-rendered upload page
//! - `/api/files` - JSON upload, listing and link endpoints
//! - `/local/{bucket}/{*key}` - objects held by the in-memory backend
//! - `/api/health` - health check

pub mod files;
pub mod health;
pub mod local;
pub mod page;

use axum::{extract::DefaultBodyLimit, response::IntoResponse, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let body_limit = state.config.server.max_upload_bytes;
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(page::router(state.clone()))
        .merge(files::router(state.clone()))
        .merge(local::router(state.clone()))
        .merge(health::router(state))
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .map_response(IntoResponse::into_response)
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use bytes::Bytes;
    use s3::error::S3Error;
    use tower::ServiceExt;
    use url::Url;

    use crate::config::Config;
    use crate::storage::{
        AccessMode, ObjectDescriptor, ObjectStorage, StorageError, StorageResult,
    };

    const BOUNDARY: &str = "----bucket-browser-test";

    fn memory_config() -> Config {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STORAGE_PROVIDER", "memory"),
            ("LOCAL_SIGNING_SECRET", "router-test-secret"),
            ("PUBLIC_BASE_URL", "http://files.test"),
        ]);
        Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap()
    }

    fn app() -> Router {
        let state = AppState::from_config(memory_config()).unwrap();
        create_router(state)
    }

    fn multipart_body(file: Option<(&str, &[u8])>, private: bool) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((name, content)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        if private {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"private\"\r\n\r\non\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    /// Path and query of an absolute link, for replaying it against the router.
    fn local_path(link: &str) -> String {
        let url = Url::parse(link).unwrap();
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    }

    async fn upload(app: &Router, name: &str, content: &[u8], private: bool) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(upload_request(
                "/api/files",
                multipart_body(Some((name, content)), private),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["storage_provider"], "memory");
        assert_eq!(json["bucket"], "demo");
    }

    #[tokio::test]
    async fn test_public_upload_is_reachable() {
        let app = app();
        let json = upload(&app, "hello.txt", b"hello world", false).await;

        assert_eq!(json["key"], "uploads/public/hello.txt");
        assert_eq!(json["access"], "public");
        assert_eq!(json["content_type"], "text/plain");
        assert_eq!(json["size"], 11);

        let url = json["url"].as_str().unwrap();
        assert!(url.starts_with("http://files.test/local/demo/"));

        let response = app.oneshot(get(&local_path(url))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain"
        );
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_private_upload_needs_signature() {
        let app = app();
        let json = upload(&app, "secret.pdf", b"%PDF-1.4", true).await;

        assert_eq!(json["key"], "uploads/private/secret.pdf");
        assert_eq!(json["access"], "private");

        let signed = json["url"].as_str().unwrap();
        assert!(signed.contains("signature="));
        let response = app.clone().oneshot(get(&local_path(signed))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "private, no-store");

        let unsigned = app
            .clone()
            .oneshot(get("/local/demo/uploads/private/secret.pdf"))
            .await
            .unwrap();
        assert_eq!(unsigned.status(), StatusCode::FORBIDDEN);

        let public = app
            .clone()
            .oneshot(get("/api/files/public-url?key=uploads/private/secret.pdf"))
            .await
            .unwrap();
        let public = body_json(public).await;
        let response = app
            .oneshot(get(&local_path(public["url"].as_str().unwrap())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let response = app()
            .oneshot(upload_request("/api/files", multipart_body(None, true)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid request");
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let response = app()
            .oneshot(upload_request(
                "/api/files",
                multipart_body(Some(("empty.txt", &b""[..])), false),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_listing_json() {
        let app = app();
        upload(&app, "a.txt", b"a", false).await;
        upload(&app, "b.txt", b"b", true).await;

        let response = app
            .clone()
            .oneshot(get("/api/files?prefix=uploads/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let objects = json["objects"].as_array().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["key"], "uploads/private/b.txt");
        assert_eq!(objects[0]["link"]["kind"], "hidden");
        assert!(objects[0]["url"].is_null());
        assert_eq!(objects[1]["key"], "uploads/public/a.txt");
        assert_eq!(objects[1]["link"]["kind"], "public");

        let response = app
            .clone()
            .oneshot(get("/api/files?prefix=uploads/private/&reveal_private=true&ttl_secs=120"))
            .await
            .unwrap();
        let json = body_json(response).await;
        let objects = json["objects"].as_array().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["link"]["kind"], "signed");
        assert_eq!(objects[0]["link"]["expires_in_secs"], 120);

        let link = objects[0]["url"].as_str().unwrap();
        let response = app.oneshot(get(&local_path(link))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_listing_unknown_prefix_is_empty() {
        let app = app();
        upload(&app, "a.txt", b"a", false).await;

        let response = app.oneshot(get("/api/files?prefix=elsewhere/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["objects"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_url_endpoint() {
        let app = app();

        let response = app
            .clone()
            .oneshot(get("/api/files/signed-url?key=uploads/private/missing.txt&ttl_secs=60"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["expires_in_secs"], 60);
        assert!(json["url"].as_str().unwrap().contains("expires="));

        let response = app
            .clone()
            .oneshot(get("/api/files/signed-url?key=a.txt&ttl_secs=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(get("/api/files/signed-url?key=a.txt&ttl_secs=604801"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_local_object() {
        let response = app()
            .oneshot(get("/local/demo/uploads/public/nothing.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_page_lists_and_escapes() {
        let app = app();
        upload(&app, "<img src=x onerror=alert(1)>.txt", b"x", false).await;
        upload(&app, "hidden.txt", b"y", true).await;

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(html.contains("&lt;img src"));
        assert!(!html.contains("<img src"));
        assert!(html.contains("hidden.txt"));
        assert!(!html.contains("signature"));

        let response = app.oneshot(get("/?reveal=true")).await.unwrap();
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        // Attribute values are entity-escaped, so match the bare parameter name.
        assert!(html.contains("signature"));
    }

    #[tokio::test]
    async fn test_reveal_flag_is_lenient() {
        let app = app();
        upload(&app, "hidden.txt", b"y", true).await;

        let response = app.clone().oneshot(get("/?reveal=on")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(html.contains("signature"));

        let response = app.oneshot(get("/?reveal=maybe")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(!html.contains("signature"));
    }

    #[tokio::test]
    async fn test_malformed_expiry_is_forbidden() {
        let app = app();
        upload(&app, "secret.pdf", b"%PDF-1.4", true).await;

        let response = app
            .oneshot(get(
                "/local/demo/uploads/private/secret.pdf?expires=abc&signature=00ff",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_cors_headers_applied() {
        let request = Request::builder()
            .uri("/api/health")
            .header(header::ORIGIN, "http://elsewhere.test")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_form_upload_redirects() {
        let app = app();
        let response = app
            .clone()
            .oneshot(upload_request(
                "/upload",
                multipart_body(Some(("notes.md", b"# notes")), false),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "/?uploaded=uploads%2Fpublic%2Fnotes.md");

        let response = app.oneshot(get(location)).await.unwrap();
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(html.contains("notes.md"));
    }

    #[tokio::test]
    async fn test_form_upload_without_file_renders_error() {
        let response = app()
            .oneshot(upload_request("/upload", multipart_body(None, false)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(html.contains("no file was provided"));
    }

    struct UnreachableBucket;

    #[async_trait]
    impl ObjectStorage for UnreachableBucket {
        fn provider(&self) -> &'static str {
            "unreachable"
        }

        async fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _body: Bytes,
            _content_type: &str,
            _access: AccessMode,
        ) -> StorageResult<()> {
            Err(StorageError::Provider(S3Error::HttpFailWithBody(
                503,
                "SlowDown".to_string(),
            )))
        }

        async fn list_by_prefix(
            &self,
            _bucket: &str,
            _prefix: &str,
        ) -> StorageResult<Vec<ObjectDescriptor>> {
            Err(StorageError::Provider(S3Error::HttpFailWithBody(
                500,
                "InternalError".to_string(),
            )))
        }

        fn public_url(&self, bucket: &str, key: &str) -> StorageResult<String> {
            Ok(format!("http://unreachable/{}/{}", bucket, key))
        }

        async fn signed_url(&self, bucket: &str, key: &str, _ttl: Duration) -> StorageResult<String> {
            Ok(format!("http://unreachable/{}/{}?signed", bucket, key))
        }
    }

    fn unreachable_app() -> Router {
        let state =
            AppState::with_storage(memory_config(), Arc::new(UnreachableBucket), None).unwrap();
        create_router(state)
    }

    #[tokio::test]
    async fn test_listing_failure_renders_error_page() {
        let response = unreachable_app().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(html.contains("Storage request failed"));
    }

    #[tokio::test]
    async fn test_upload_failure_is_bad_gateway() {
        let response = unreachable_app()
            .oneshot(upload_request(
                "/api/files",
                multipart_body(Some(("a.txt", b"a")), false),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_local_route_disabled_without_memory_store() {
        let response = unreachable_app()
            .oneshot(get("/local/demo/uploads/public/a.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STORAGE_PROVIDER", "memory"),
            ("MAX_UPLOAD_BYTES", "64"),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        let app = create_router(AppState::from_config(config).unwrap());

        let response = app
            .oneshot(upload_request(
                "/api/files",
                multipart_body(Some(("big.bin", &[7u8; 1024][..])), false),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Upload too large");
    }
}

//! HTTP route layer
//!
//! Thin handlers translating requests into calls on the upload engine,
//! download gate, and reputation guard.

pub mod admin;
pub mod download;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Resolve the client address from proxy headers.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the application router
pub fn app(state: AppState) -> Router {
    // Headroom over the upload cap for multipart framing; the engine
    // still enforces the exact limit.
    let body_limit = state.config().limits.max_upload_bytes as usize + 64 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/upload", post(upload::direct_upload))
        .route("/api/v1/upload/sessions", post(upload::begin_session))
        .route(
            "/api/v1/upload/sessions/:upload_id",
            get(upload::session_status).delete(upload::cancel_session),
        )
        .route(
            "/api/v1/upload/sessions/:upload_id/chunks/:index",
            put(upload::put_chunk),
        )
        .route("/api/v1/files/:id", get(download::file_details))
        .route("/:id", get(download::download))
        .nest("/api/v1/admin", admin::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::ReputationStore;
    use crate::testing::{test_context, test_context_with};
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use bytes::Bytes;
    use serde_json::{json, Value};

    fn forwarded_for(value: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static(value),
        )
    }

    #[test]
    fn client_ip_prefers_forwarded_chain_head() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "203.0.113.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");

        assert_eq!(client_ip(&HeaderMap::new()), "127.0.0.1");
    }

    #[tokio::test]
    async fn unknown_api_path_is_not_found() {
        use tower::ServiceExt;

        let ctx = test_context();
        let response = app(ctx.state)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/nope/extra")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn direct_upload_then_single_use_download() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let response = server
            .post("/api/v1/upload")
            .add_query_param("filename", "hello.txt")
            .bytes(Bytes::from_static(b"hello world"))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["size"], 11);
        assert_eq!(body["filename"], "hello.txt");
        let id = body["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 8);

        // First download redirects to the blob.
        let download = server.get(&format!("/{}", id)).await;
        assert_eq!(download.status_code(), StatusCode::TEMPORARY_REDIRECT);

        // Second download is terminally gone.
        let second = server.get(&format!("/{}", id)).await;
        assert_eq!(second.status_code(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn direct_upload_requires_filename() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let response = server
            .post("/api/v1/upload")
            .bytes(Bytes::from_static(b"data"))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chunked_session_flow_end_to_end() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let begin = server
            .post("/api/v1/upload/sessions")
            .json(&json!({ "filename": "demo.bin", "totalSize": 8 }))
            .await;
        assert_eq!(begin.status_code(), StatusCode::OK);
        let upload_id = begin.json::<Value>()["uploadId"]
            .as_str()
            .unwrap()
            .to_string();

        let first = server
            .put(&format!("/api/v1/upload/sessions/{}/chunks/0", upload_id))
            .bytes(Bytes::from_static(b"AAAA"))
            .await;
        assert_eq!(first.status_code(), StatusCode::OK);
        let ack: Value = first.json();
        assert_eq!(ack["received"], true);
        assert_eq!(ack["chunksReceived"], 1);

        let status = server
            .get(&format!("/api/v1/upload/sessions/{}", upload_id))
            .await;
        assert_eq!(status.status_code(), StatusCode::OK);
        let progress: Value = status.json();
        assert_eq!(progress["totalSize"], 8);
        assert_eq!(progress["bytesReceived"], 4);
        assert_eq!(progress["progress"], 50.0);

        let last = server
            .put(&format!(
                "/api/v1/upload/sessions/{}/chunks/1",
                upload_id
            ))
            .add_query_param("last", true)
            .bytes(Bytes::from_static(b"BBBB"))
            .await;
        assert_eq!(last.status_code(), StatusCode::OK);
        let complete: Value = last.json();
        assert_eq!(complete["size"], 8);
        assert_eq!(complete["id"], upload_id.as_str());

        // The finalized file is downloadable exactly once.
        let download = server.get(&format!("/{}", upload_id)).await;
        assert_eq!(download.status_code(), StatusCode::TEMPORARY_REDIRECT);
        let second = server.get(&format!("/{}", upload_id)).await;
        assert_eq!(second.status_code(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn begin_session_rejects_zero_total_size() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let response = server
            .post("/api/v1/upload/sessions")
            .json(&json!({ "filename": "demo.bin", "totalSize": 0 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["code"], "INVALID_SIZE");
    }

    #[tokio::test]
    async fn banned_ip_is_rejected_before_upload() {
        let ctx = test_context();
        ctx.reputation
            .ban("203.0.113.66", "test ban", Some(24))
            .await
            .unwrap();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let (name, value) = forwarded_for("203.0.113.66");
        let response = server
            .post("/api/v1/upload")
            .add_query_param("filename", "x.txt")
            .add_header(name, value)
            .bytes(Bytes::from_static(b"data"))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        // Nothing reached blob storage.
        assert_eq!(ctx.blob.put_count(), 0);
    }

    #[tokio::test]
    async fn chunk_for_unknown_session_is_not_found() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let response = server
            .put("/api/v1/upload/sessions/nosuchid/chunks/0")
            .bytes(Bytes::from_static(b"AAAA"))
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let body: Value = response.json();
        assert_eq!(body["code"], "SESSION_NOT_FOUND");
    }

    fn admin_config() -> Config {
        let mut config = Config::default();
        config.server.admin_password = Some("hunter2".to_string());
        config
    }

    #[tokio::test]
    async fn admin_auth_accepts_correct_password() {
        let ctx = test_context_with(admin_config());
        let server = TestServer::new(app(ctx.state)).unwrap();

        let response = server
            .post("/api/v1/admin/auth")
            .json(&json!({ "password": "hunter2" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["success"], true);
    }

    #[tokio::test]
    async fn admin_auth_rejects_and_eventually_bans() {
        let ctx = test_context_with(admin_config());
        let server = TestServer::new(app(ctx.state.clone())).unwrap();

        for _ in 0..4 {
            let response = server
                .post("/api/v1/admin/auth")
                .json(&json!({ "password": "wrong" }))
                .await;
            assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        }

        // Fifth failure crosses the policy threshold.
        let fifth = server
            .post("/api/v1/admin/auth")
            .json(&json!({ "password": "wrong" }))
            .await;
        assert_eq!(fifth.status_code(), StatusCode::TOO_MANY_REQUESTS);

        // The address is now banned outright.
        let banned = server
            .post("/api/v1/admin/auth")
            .json(&json!({ "password": "hunter2" }))
            .await;
        assert_eq!(banned.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_endpoints_require_token() {
        let ctx = test_context_with(admin_config());
        let server = TestServer::new(app(ctx.state)).unwrap();

        let unauthorized = server.get("/api/v1/admin/files").await;
        assert_eq!(unauthorized.status_code(), StatusCode::UNAUTHORIZED);

        let authorized = server
            .get("/api/v1/admin/files")
            .add_header(
                HeaderName::from_static("x-admin-token"),
                HeaderValue::from_static("hunter2"),
            )
            .await;
        assert_eq!(authorized.status_code(), StatusCode::OK);

        let body: Value = authorized.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn file_details_are_read_only() {
        let ctx = test_context();
        let server = TestServer::new(app(ctx.state)).unwrap();

        let upload = server
            .post("/api/v1/upload")
            .add_query_param("filename", "doc.pdf")
            .bytes(Bytes::from_static(b"%PDF-1.4"))
            .await;
        let id = upload.json::<Value>()["id"].as_str().unwrap().to_string();

        // Details twice; neither consumes the download.
        for _ in 0..2 {
            let details = server.get(&format!("/api/v1/files/{}", id)).await;
            assert_eq!(details.status_code(), StatusCode::OK);
            assert_eq!(details.json::<Value>()["filename"], "doc.pdf");
        }

        let download = server.get(&format!("/{}", id)).await;
        assert_eq!(download.status_code(), StatusCode::TEMPORARY_REDIRECT);
    }
}

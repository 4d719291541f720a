//! 路由与中间件装配。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::any;
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::admission::AdmissionGate;
use crate::config::{FILES_ROUTE, UPLOAD_ROUTE};
use crate::error::ResponseMode;
use crate::files::file_service;
use crate::http::{add_security_headers, build_cors_layer, client_ip_for_log};
use crate::settings::Settings;
use crate::storage::Storage;
use crate::upload::{self, UploadConfig};

/// 路由所需的共享状态，进程生命周期内只构建一次。
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub storage: Arc<Storage>,
    pub gate: Arc<AdmissionGate>,
    pub upload: Arc<UploadConfig>,
    pub mode: ResponseMode,
}

pub fn build_router(context: AppContext, cors_origins: Option<&str>) -> Router {
    let mut app = Router::new()
        .route(
            UPLOAD_ROUTE,
            any(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .nest_service(FILES_ROUTE, file_service(context.storage.root_path()))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = client_ip_for_log(request);
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(context.settings))
        .layer(Extension(context.storage))
        .layer(Extension(context.gate))
        .layer(Extension(context.upload))
        .layer(Extension(context.mode));

    if let Some(cors_layer) = build_cors_layer(cors_origins) {
        app = app.layer(cors_layer);
    }
    app
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::limiter::{LimiterRegistry, RateConfig};
    use crate::settings::SettingsDocument;
    use crate::upload::UploadResponse;

    fn make_app(mode: ResponseMode, peer: &str) -> (tempfile::TempDir, Router) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create root");
        let settings = Settings::from_document(SettingsDocument {
            dir: root.to_string_lossy().into_owned(),
            ip: vec!["127.0.0.1".to_string()],
            url: "http://localhost:4545/files".to_string(),
        })
        .expect("settings");
        let limiters = Arc::new(LimiterRegistry::new(RateConfig {
            rate: 20.0,
            burst: 1,
        }));
        let context = AppContext {
            gate: Arc::new(AdmissionGate::new(settings.allowlist().clone(), limiters)),
            storage: Arc::new(Storage::new(root)),
            settings: Arc::new(settings),
            upload: Arc::new(UploadConfig {
                max_size: 1024,
                timeout: Duration::from_secs(30),
            }),
            mode,
        };
        let peer = SocketAddr::new(peer.parse().expect("peer"), 51000);
        let app = build_router(context, None).layer(MockConnectInfo(peer));
        (temp, app)
    }

    fn upload_request(dir: &str, filename: &str, body: &'static [u8]) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header("Dir", dir)
            .header("Filename", filename)
            .body(Body::from(body))
            .expect("request")
    }

    async fn read_body(response: axum::response::Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn uploaded_bytes_round_trip_through_public_url() {
        let (_temp, app) = make_app(ResponseMode::Compat, "127.0.0.1");
        let payload: &'static [u8] = b"\x00binary\xffpayload\n";

        let response = app
            .clone()
            .oneshot(upload_request("docs/nested", "report 1.bin", payload))
            .await
            .expect("upload response");
        assert_eq!(response.status(), StatusCode::OK);
        let stored: UploadResponse =
            serde_json::from_slice(&read_body(response).await).expect("upload json");
        assert_eq!(
            stored.url,
            "http://localhost:4545/files/docs/nested/report%201.bin"
        );

        let path = stored
            .url
            .strip_prefix("http://localhost:4545")
            .expect("local url");
        let response = app
            .oneshot(
                Request::builder()
                    .uri(path)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("download response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, payload);
    }

    #[tokio::test]
    async fn backslash_dir_is_retrievable_at_returned_url() {
        let (temp, app) = make_app(ResponseMode::Strict, "127.0.0.1");

        let response = app
            .clone()
            .oneshot(upload_request("a\\b", "x.txt", b"split"))
            .await
            .expect("upload response");
        assert_eq!(response.status(), StatusCode::OK);
        let stored: UploadResponse =
            serde_json::from_slice(&read_body(response).await).expect("upload json");
        assert_eq!(stored.url, "http://localhost:4545/files/a/b/x.txt");
        assert!(temp.path().join("storage").join("a").join("b").join("x.txt").is_file());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/files/a/b/x.txt")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("download response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, b"split");
    }

    #[tokio::test]
    async fn ipv4_mapped_peer_is_admitted_by_ipv4_entry() {
        let (_temp, app) = make_app(ResponseMode::Strict, "::ffff:127.0.0.1");
        let response = app
            .oneshot(upload_request("docs", "a.txt", b"hello"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let stored: UploadResponse =
            serde_json::from_slice(&read_body(response).await).expect("upload json");
        assert_eq!(stored.url, "http://localhost:4545/files/docs/a.txt");
    }

    #[tokio::test]
    async fn retrieval_skips_admission() {
        let (temp, app) = make_app(ResponseMode::Compat, "203.0.113.50");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(root.join("docs")).expect("create dir");
        std::fs::write(root.join("docs").join("a.txt"), b"public").expect("write");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/files/docs/a.txt")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, b"public");
    }

    #[tokio::test]
    async fn strict_mode_uses_error_status_codes() {
        let (_temp, app) = make_app(ResponseMode::Strict, "10.0.0.8");
        let response = app
            .oneshot(upload_request("docs", "a.txt", b"hello"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value =
            serde_json::from_slice(&read_body(response).await).expect("json");
        assert_eq!(body, serde_json::json!({ "error": "address not allowed: 10.0.0.8" }));
    }

    #[tokio::test]
    async fn compat_mode_answers_wrong_method_with_ok() {
        let (_temp, app) = make_app(ResponseMode::Compat, "127.0.0.1");
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/upload")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::X_CONTENT_TYPE_OPTIONS)
                .and_then(|value| value.to_str().ok()),
            Some("nosniff")
        );
        let body: serde_json::Value =
            serde_json::from_slice(&read_body(response).await).expect("json");
        assert_eq!(body, serde_json::json!({ "error": "method not allowed" }));
    }
}

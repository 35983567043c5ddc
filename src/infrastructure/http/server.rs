//! HTTP Server
//!
//! Axum HTTP 服务器启动和配置

use std::path::PathBuf;
use std::sync::Arc;

use axum::middleware;
use axum::Router;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::middleware::error_logging_middleware;
use super::routes::create_routes;
use super::state::AppState;

/// 服务器配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 产物静态服务的 URL 前缀
    pub files_path: String,
    /// 产物根目录
    pub artifacts_dir: PathBuf,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            files_path: "/files".to_string(),
            artifacts_dir: PathBuf::from("data/artifacts"),
        }
    }

    pub fn with_files(mut self, files_path: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.files_path = files_path.into();
        self.artifacts_dir = dir.into();
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// HTTP 服务器
pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// 创建新的 HTTP 服务器
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// 构建 Router
    fn build_router(&self) -> Router {
        // CORS 配置 - 允许所有来源的跨域请求
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .expose_headers(Any)
            .max_age(std::time::Duration::from_secs(3600));

        let files_path = self.config.files_path.trim_end_matches('/');

        create_routes()
            .nest_service(files_path, ServeDir::new(&self.config.artifacts_dir))
            .layer(middleware::from_fn(error_logging_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// 启动服务器
    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.build_router();
        let addr = self.config.addr();

        info!("Starting HTTP server on {}", addr);

        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }

    /// 启动服务器（带优雅关闭）
    pub async fn run_with_shutdown<F>(self, shutdown_signal: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let addr = self.config.addr();

        info!(
            files_path = %self.config.files_path,
            artifacts_dir = %self.config.artifacts_dir.display(),
            "Starting HTTP server on {} (with graceful shutdown)",
            addr
        );

        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ArtifactStoragePort;
    use crate::infrastructure::events::EventPublisher;
    use crate::infrastructure::memory::InMemoryBookRegistry;
    use crate::infrastructure::worker::testing::{fixture, settings, Fixture};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn server(fx: &Fixture) -> HttpServer {
        let registry = Arc::new(InMemoryBookRegistry::new(fx.ctx.clone()));
        let state = AppState::new(
            registry,
            fx.repository.clone(),
            Arc::new(EventPublisher::new()),
            "/files",
        );
        let config = ServerConfig::new("127.0.0.1", 0)
            .with_files("/files", fx._dir.path().join("artifacts"));
        HttpServer::new(config, state)
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let fx = fixture(settings(2, false)).await;
        let router = server(&fx).build_router();

        let (status, body) = call(
            &router,
            Request::get("/api/ping").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_then_query_progress() {
        let fx = fixture(settings(2, false)).await;
        let router = server(&fx).build_router();

        let (_, created) = call(&router, post("/api/book/create", json!({}))).await;
        assert_eq!(created["errno"], 0);
        let book_id = created["data"]["book_id"].as_str().unwrap().to_string();

        let (_, progress) = call(
            &router,
            post("/api/book/progress", json!({ "book_id": book_id })),
        )
        .await;
        assert_eq!(progress["errno"], 0);
        assert_eq!(progress["data"]["total"], 6);

        let (_, again) = call(
            &router,
            post("/api/book/create", json!({ "book_id": book_id })),
        )
        .await;
        assert_eq!(again["data"]["book_id"], book_id.as_str());
    }

    #[tokio::test]
    async fn test_business_errors_use_errno() {
        let fx = fixture(settings(2, false)).await;
        let router = server(&fx).build_router();

        let unknown = uuid::Uuid::new_v4().to_string();
        let (status, body) = call(
            &router,
            post("/api/book/state", json!({ "book_id": unknown })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errno"], 404);

        let (_, created) = call(&router, post("/api/book/create", json!({}))).await;
        let (_, invalid) = call(
            &router,
            post(
                "/api/book/character_spec",
                json!({
                    "book_id": created["data"]["book_id"],
                    "spec": { "name": "", "age": 5, "style": "crayon" }
                }),
            ),
        )
        .await;
        assert_eq!(invalid["errno"], 400);
    }

    #[tokio::test]
    async fn test_serves_artifacts_under_files_path() {
        let fx = fixture(settings(2, false)).await;
        fx.ctx
            .storage
            .put("books/demo/manifest.json", br#"{"ok":true}"#)
            .await
            .unwrap();
        let router = server(&fx).build_router();

        let (status, body) = call(
            &router,
            Request::get("/files/books/demo/manifest.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }
}

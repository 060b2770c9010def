use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use status_relay::{RelayRegistry, WebhookIngest};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::config::{ServerConfig, SnsTopics};
use crate::publisher::{EventPublisher, HttpEventPublisher, LogEventPublisher};
use crate::storage::{ArtifactStore, LocalArtifactStore};
use crate::websocket;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: RelayRegistry,
    pub ingest: WebhookIngest,
    pub store: Arc<dyn ArtifactStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub topics: SnsTopics,
    /// Cancelled on shutdown; forwarding tasks and the sweeper hang off it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_config(config: &ServerConfig, shutdown: CancellationToken) -> Self {
        let registry = RelayRegistry::new(config.channel);
        let ingest = WebhookIngest::new(registry.clone(), config.terminal_policy.clone());

        let store: Arc<dyn ArtifactStore> = Arc::new(LocalArtifactStore::new(
            config.storage_root.clone(),
            config.bucket.clone(),
        ));

        let publisher: Arc<dyn EventPublisher> = match &config.publish_endpoint {
            Some(endpoint) => {
                info!("🔧 Publishing new uploads to {}", endpoint);
                Arc::new(HttpEventPublisher::new(endpoint.clone()))
            }
            None => {
                info!("🔧 No publish endpoint configured, announcements are logged only");
                Arc::new(LogEventPublisher)
            }
        };

        Self {
            registry,
            ingest,
            store,
            publisher,
            topics: config.topics.clone(),
            shutdown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_upload_bytes: usize,
    pub static_dir: Option<PathBuf>,
    pub cors: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            static_dir: None,
            cors: false,
        }
    }
}

impl From<&ServerConfig> for RouterOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            static_dir: config.static_dir.clone(),
            cors: config.cors,
        }
    }
}

pub fn build_router(state: AppState, options: RouterOptions) -> Router {
    let mut app = Router::new()
        // Health check
        .route("/health", get(api::health))

        // Upload intake
        .route(
            "/upload",
            post(api::upload)
                .layer::<_, Infallible>(DefaultBodyLimit::disable())
                .layer::<_, Infallible>(RequestBodyLimitLayer::new(options.max_upload_bytes)),
        )

        // Worker status webhook
        .route("/imageStatus", post(api::status_webhook))

        // WebSocket for status streaming
        .route("/imageStatus/{id}/ws", get(websocket::websocket_handler))

        // Shared state
        .with_state(state);

    if let Some(dir) = options.static_dir {
        info!("🔧 Serving static files from {}", dir.display());
        app = app.nest_service("/static", ServeDir::new(dir));
    }

    if options.cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use status_relay::{ChannelConfig, TerminalPolicy};
    use tower::ServiceExt;

    fn state(root: &std::path::Path) -> AppState {
        let registry = RelayRegistry::new(ChannelConfig::default());
        AppState {
            ingest: WebhookIngest::new(registry.clone(), TerminalPolicy::default()),
            registry,
            store: Arc::new(LocalArtifactStore::new(root, "receipts")),
            publisher: Arc::new(LogEventPublisher),
            topics: SnsTopics {
                new_image: "arn:aws:sns:us-east-1:123456789012:new-image".to_string(),
            },
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_upload_route_enforces_body_limit() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("index.html"), "<html></html>").unwrap();

        let app = build_router(
            state(dir.path()),
            RouterOptions {
                max_upload_bytes: 16,
                static_dir: Some(static_dir.path().to_path_buf()),
                cors: true,
            },
        );

        let oversized = Request::post("/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=x")
            .header(header::CONTENT_LENGTH, 64)
            .body(Body::from(vec![b'a'; 64]))
            .unwrap();
        let response = app.clone().oneshot(oversized).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let page = Request::get("/static/index.html")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(page).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

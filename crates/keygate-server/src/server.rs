use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use keygate_auth::storage::{MemoryStateStore, StateStore};
use keygate_auth::{AuthEngine, AuthState};
use keygate_store_redis::RedisStateStore;
use serde_json::json;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::{AppConfig, StorageBackend};

pub struct KeygateServer {
    addr: SocketAddr,
    app: Router,
}

/// Opens the configured state store.
pub async fn open_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory state store; state is not shared between workers");
            let store = Arc::new(MemoryStateStore::new());
            store.start_purge_task(Duration::from_secs(
                cfg.storage.memory_purge_interval_seconds,
            ));
            Ok(store)
        }
        StorageBackend::Redis => {
            let store = RedisStateStore::connect(&cfg.storage.redis).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Builds the full application: auth routes, health check and middleware.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let store = open_store(cfg).await?;
    let engine = AuthEngine::build(cfg.auth.clone(), store)?;
    Ok(build_app_with_engine(cfg, Arc::new(engine)))
}

pub fn build_app_with_engine(cfg: &AppConfig, engine: Arc<AuthEngine>) -> Router {
    let state = AuthState::new(engine).with_trust_forwarded_for(cfg.server.trust_forwarded_for);
    let body_limit = cfg.server.body_limit_bytes;

    Router::new()
        .route("/healthz", get(healthz))
        .with_state(state.clone())
        .merge(keygate_auth::router(state))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // Query strings carry codes and signatures; log the path only.
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn healthz(State(state): State<AuthState>) -> Response {
    match state.engine.store.ping().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "State store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<KeygateServer> {
        let app = build_app(&self.config).await?;
        Ok(KeygateServer {
            addr: self.config.addr(),
            app,
        })
    }
}

impl KeygateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

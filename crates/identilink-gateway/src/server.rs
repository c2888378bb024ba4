//! HTTP server: `/identify` and `/health`

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use identilink_core::{ServiceConfig, StoreBackend, StoreConfig};
use identilink_resolver::{IdentityResolver, ResolverOptions};
use identilink_store::{ContactStore, InMemoryContactStore, SqliteContactStore, StoreError};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::request::parse_identify;

pub struct AppState {
    pub resolver: IdentityResolver,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(resolver: IdentityResolver) -> Self {
        Self {
            resolver,
            started_at: Instant::now(),
        }
    }
}

/// Open the configured contact store.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ContactStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory contact store; data is lost on exit");
            Ok(Arc::new(InMemoryContactStore::new()))
        }
        StoreBackend::Sqlite => Ok(Arc::new(SqliteContactStore::open(
            &config.path,
            Duration::from_millis(config.busy_timeout_ms),
        )?)),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/identify", post(identify_handler))
        .route("/health", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any)),
        )
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub async fn start_gateway(config: ServiceConfig) -> anyhow::Result<()> {
    let store = open_store(&config.store)?;
    let resolver = IdentityResolver::new(store.clone(), ResolverOptions::from(&config.resolver));
    let state = Arc::new(AppState::new(resolver));

    let bind_addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {}: {}", config.bind_addr(), e))?;

    info!("Identilink Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Store: {}", store.backend_name());
    if config.store.backend == StoreBackend::Sqlite {
        info!("  Database: {}", config.store.path.display());
    }

    let listener = TcpListener::bind(&bind_addr).await?;
    serve(listener, state, shutdown_signal()).await?;

    store.close()?;
    info!("Identilink Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn identify_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let observation = parse_identify(&body)?;
    let resolver = state.resolver.clone();
    let resolution = tokio::task::spawn_blocking(move || resolver.identify(&observation))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(json!({ "contact": resolution.view })))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.resolver.store().backend_name(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

//! HTTP transport: maps requests onto [`KeyStore`] operations and store
//! errors onto status codes.

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

use crate::{
    error::{ErrorKind, StoreError},
    middleware::{
        create_body_limit_layer, create_cors_layer, create_rate_limiter, rate_limit_middleware,
        request_logging_middleware,
    },
    reclaimer::Reclaimer,
    settings::Settings,
    store::{self, KeyStore},
};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            started_at: Instant::now(),
        }
    }
}

/// Error body, shaped `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidInput | ErrorKind::EmptySequence => StatusCode::BAD_REQUEST,
            ErrorKind::KeyNotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => {
                error!(error = ?self.0, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Key selector; `session_id` is accepted as an alias of `seed_id`.
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    #[serde(alias = "session_id")]
    pub seed_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(alias = "session_id")]
    pub seed_id: String,
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize)]
pub struct Batch {
    pub values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SessionBatch {
    pub session_id: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appended: Option<usize>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MedianResponse {
    pub median: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportResponse {
    pub seed_id: String,
    pub count: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub uptime_seconds: u64,
    pub keys: usize,
}

/// Create the HTTP router with all endpoints and middleware
pub fn create_router(state: AppState, settings: &Settings) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/append", post(append))
        .route("/add", post(add))
        .route("/median", get(median))
        .route("/export", get(export))
        .route("/clear", post(clear))
        .with_state(state);

    if let Some(rate_limiter) = create_rate_limiter(&settings.server) {
        app = app.layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));
    }

    app.layer(middleware::from_fn(request_logging_middleware))
        .layer(create_cors_layer(&settings.server))
        .layer(create_body_limit_layer(settings.server.max_request_size_mb))
        .layer(TraceLayer::new_for_http())
}

/// Liveness endpoint
#[instrument(skip(state))]
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let keys = state.store.len().await?;
    Ok(Json(HealthResponse {
        status: "alive".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.store.name().to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        keys,
    }))
}

/// Append a batch to the key named in the query string
#[instrument(skip(state, batch), fields(samples = batch.values.len()))]
async fn append(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
    Json(batch): Json<Batch>,
) -> Result<Json<AppendResponse>, ApiError> {
    let count = state.store.append(&query.seed_id, &batch.values).await?;
    Ok(Json(AppendResponse {
        status: "ok".to_string(),
        appended: Some(batch.values.len()),
        count,
    }))
}

/// Append a batch to the key named in the body
#[instrument(skip(state, batch), fields(session_id = %batch.session_id, samples = batch.values.len()))]
async fn add(
    State(state): State<AppState>,
    Json(batch): Json<SessionBatch>,
) -> Result<Json<AppendResponse>, ApiError> {
    let count = state.store.append(&batch.session_id, &batch.values).await?;
    Ok(Json(AppendResponse {
        status: "ok".to_string(),
        appended: None,
        count,
    }))
}

#[instrument(skip(state))]
async fn median(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<MedianResponse>, ApiError> {
    let median = state.store.median(&query.seed_id).await?;
    Ok(Json(MedianResponse { median }))
}

#[instrument(skip(state))]
async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let values = state.store.export(&query.seed_id).await?;
    let response = match query.format {
        ExportFormat::Json => Json(ExportResponse {
            seed_id: query.seed_id,
            count: values.len(),
            values,
        })
        .into_response(),
        ExportFormat::Csv => {
            let mut body = String::from("value\n");
            for value in &values {
                body.push_str(&value.to_string());
                body.push('\n');
            }
            ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response()
        }
    };
    Ok(response)
}

/// Drop a key. Always succeeds for absent keys.
#[instrument(skip(state))]
async fn clear(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.store.clear(&query.seed_id).await?;
    Ok(Json(StatusResponse {
        status: "cleared".to_string(),
    }))
}

/// Start the HTTP server and the reclaimer, and run until a shutdown signal
pub async fn serve(settings: &Settings, addr: Option<SocketAddr>) -> Result<()> {
    let store = store::build(&settings.store)?;
    info!(
        backend = store.name(),
        ttl_secs = settings.store.ttl_seconds,
        sweep_secs = settings.store.sweep_interval_seconds,
        "store ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaimer = Reclaimer::new(
        store.clone(),
        settings.store.ttl(),
        settings.store.sweep_interval(),
    )
    .spawn(shutdown_rx);

    let app = create_router(AppState::new(store), settings);

    let addr = match addr {
        Some(addr) => addr,
        None => format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .context("Invalid server address")?,
    };
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reclaimer.await {
        error!("Reclaimer task failed: {}", e);
    }

    result.context("HTTP server error")?;
    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}

use super::{Collector, Health};
use crate::{
    signal::{BatchPayload, IngestReceipt, StoredRecord},
    Error,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    collector: Arc<Collector>,
    timeout: Duration,
}

/// Query string of the preview endpoint
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub limit: Option<usize>,
}

/// Body returned by the preview endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub lines: Vec<StoredRecord>,
}

/// Failure of an HTTP request
#[derive(Debug)]
pub enum ApiError {
    Collector(Error),
    Timeout,
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Collector(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Collector(Error::InvalidRequest(msg) | Error::InvalidInput(msg)) => (StatusCode::BAD_REQUEST, msg),
            Self::Collector(Error::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            Self::Collector(e) => {
                error!("Collector error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "request timed out".to_string()),
            Self::Internal(msg) => {
                error!("Collector task failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Run blocking collector work off the async executor, bounded by the server timeout
async fn run_blocking<T, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Collector) -> crate::Result<T> + Send + 'static,
{
    let collector = state.collector.clone();
    let task = tokio::task::spawn_blocking(move || work(&collector));
    match tokio::time::timeout(state.timeout, task).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(join_error)) => Err(ApiError::Internal(join_error.to_string())),
        Err(_) => Err(ApiError::Timeout),
    }
}

async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(state.collector.health())
}

async fn ingest_signals(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<BatchPayload>,
) -> Result<Json<IngestReceipt>, ApiError> {
    let count = payload.batch.len();
    let target = session_id.clone();
    let result = run_blocking(&state, move |collector| collector.ingest(&target, &payload)).await;
    if let Err(e) = &result {
        warn!("Ingest of {} signals for session {} failed: {:?}", count, session_id, e);
    }
    result.map(Json)
}

async fn preview(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let lines = run_blocking(&state, move |collector| collector.preview(&session_id, query.limit)).await?;
    Ok(Json(PreviewResponse { lines }))
}

/// Routes of the collection service
pub fn router(collector: Arc<Collector>) -> Router {
    let timeout = collector.config().request_timeout();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sessions/:session_id/signals", post(ingest_signals))
        .route("/v1/sessions/:session_id/preview", get(preview))
        .layer(CorsLayer::permissive())
        .with_state(AppState { collector, timeout })
}

/// Serve on an already bound listener until `shutdown` resolves
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections
pub async fn serve<S>(listener: TcpListener, collector: Arc<Collector>, shutdown: S) -> crate::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    info!("Collector listening on {}", listener.local_addr()?);
    axum::serve(listener, router(collector))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Collector stopped");
    Ok(())
}

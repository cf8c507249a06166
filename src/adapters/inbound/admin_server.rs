//! Admin API Server
//!
//! HTTP control surface for operators: look up servers, start and stop
//! them, add or remove proxy backends and trigger the batch jobs.

use crate::application::{AutoStartReport, Orchestrator, Outcome, SyncEngine};
use crate::domain::entities::{Backend, ExternalServer};
use crate::domain::errors::SyncError;
use crate::domain::value_objects::ServerStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub watched_servers: usize,
    pub backends: usize,
}

#[derive(Debug, Deserialize)]
pub struct CompletionQuery {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionsResponse {
    pub completions: Vec<String>,
}

/// A server as reported to API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerResponse {
    pub id: String,
    pub name: String,
    pub address: String,
    pub status: String,
    pub subscribed: bool,
}

impl From<ExternalServer> for ServerResponse {
    fn from(server: ExternalServer) -> Self {
        Self {
            id: server.id,
            name: server.name,
            address: server.address,
            status: server.status.to_string(),
            subscribed: server.subscribed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoStopResponse {
    pub stopped: usize,
}

/// Errors returned by admin handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Sync(SyncError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Sync(SyncError::InvalidState { .. } | SyncError::RegistrationConflict { .. }) => {
                StatusCode::CONFLICT
            }
            Self::Sync(SyncError::RemoteApi(_)) => StatusCode::BAD_GATEWAY,
            Self::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("admin request failed: {}", self);
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.to_string()
            })),
        )
            .into_response()
    }
}

/// Admin server state.
#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<SyncEngine>,
    pub orchestrator: Arc<Orchestrator>,
    /// Parent of the token auto-stop runs under
    pub shutdown: CancellationToken,
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/servers/:query", get(get_server_handler))
        .route("/api/v1/servers/:query/start", post(start_handler))
        .route("/api/v1/servers/:query/stop", post(stop_handler))
        .route("/api/v1/servers/:query/restart", post(restart_handler))
        .route("/api/v1/servers/:query/watch", post(watch_handler))
        .route("/api/v1/completions", get(completions_handler))
        .route("/api/v1/backends", get(list_backends_handler))
        .route("/api/v1/backends/:name", delete(remove_backend_handler))
        .route("/api/v1/jobs/auto-start", post(auto_start_handler))
        .route("/api/v1/jobs/auto-stop", post(auto_stop_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct AdminServer {
    listen_addr: String,
    state: AdminState,
}

impl AdminServer {
    pub fn new(listen_addr: String, state: AdminState) -> Self {
        Self { listen_addr, state }
    }

    /// Serve until the shutdown token is cancelled.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("admin API listening on {}", self.listen_addr);

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

// Handler functions

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let backends = state.engine.reconciler().directory().list().await.len();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        watched_servers: state.engine.registry().len(),
        backends,
    })
}

async fn get_server_handler(
    State(state): State<AdminState>,
    Path(query): Path<String>,
) -> Result<Json<ServerResponse>, ApiError> {
    let server = state.engine.resolve(&query, false).await?;
    Ok(Json(server.into()))
}

async fn start_handler(
    State(state): State<AdminState>,
    Path(query): Path<String>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let server = state.engine.start(&query, None).await?;
    Ok((StatusCode::ACCEPTED, Json(server.into())))
}

async fn stop_handler(
    State(state): State<AdminState>,
    Path(query): Path<String>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let server = state.engine.stop(&query, None).await?;
    Ok((StatusCode::ACCEPTED, Json(server.into())))
}

async fn restart_handler(
    State(state): State<AdminState>,
    Path(query): Path<String>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let server = state.engine.restart(&query, None).await?;
    Ok((StatusCode::ACCEPTED, Json(server.into())))
}

async fn watch_handler(
    State(state): State<AdminState>,
    Path(query): Path<String>,
) -> Result<Json<Outcome>, ApiError> {
    let outcome = state.engine.add(&query, None).await?;
    Ok(Json(outcome))
}

async fn completions_handler(
    State(state): State<AdminState>,
    Query(params): Query<CompletionQuery>,
) -> Result<Json<CompletionsResponse>, ApiError> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(
            ServerStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status {}", raw)))?,
        ),
        None => None,
    };
    let completions = state.engine.completions(&params.prefix, status).await?;
    Ok(Json(CompletionsResponse { completions }))
}

async fn list_backends_handler(State(state): State<AdminState>) -> Json<Vec<Backend>> {
    Json(state.engine.reconciler().directory().list().await)
}

async fn remove_backend_handler(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<Outcome>, ApiError> {
    let outcome = state.engine.remove(&name).await?;
    tracing::info!("removed backend {} via admin API", name);
    Ok(Json(outcome))
}

async fn auto_start_handler(State(state): State<AdminState>) -> Json<AutoStartReport> {
    Json(state.orchestrator.run_auto_start().await)
}

async fn auto_stop_handler(
    State(state): State<AdminState>,
) -> Result<Json<AutoStopResponse>, ApiError> {
    let cancel = state.shutdown.child_token();
    let stopped = state.orchestrator.run_auto_stop(&cancel).await?;
    Ok(Json(AutoStopResponse { stopped }))
}

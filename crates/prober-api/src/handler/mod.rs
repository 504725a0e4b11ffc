//! HTTP handlers for the prober service

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use prober_core::{
    render_html, ComplianceStatus, DashboardGateway, DashboardView, EvaluationRun,
    EvictionScheduler, Orchestrator, ProbeRegistry, ProbeState, ProberError, ProberMetrics,
    ResultStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app::ProberApp;

/// Path the HTML dashboard posts rechecks to
const DASHBOARD_RECHECK_PATH: &str = "/dashboard/recheck";

/// Application state
pub struct AppState {
    pub registry: Arc<ProbeRegistry>,
    pub store: Arc<dyn ResultStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub dashboard: DashboardGateway,
    pub eviction: EvictionScheduler,
    pub metrics: ProberMetrics,
}

impl AppState {
    pub fn new(app: &ProberApp) -> Self {
        Self {
            registry: app.registry.clone(),
            store: app.store.clone(),
            orchestrator: app.orchestrator.clone(),
            dashboard: app.dashboard.clone(),
            eviction: app.eviction.clone(),
            metrics: app.metrics.clone(),
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        // Dashboard
        .route("/dashboard", get(dashboard_page))
        .route("/dashboard/recheck/:probe", post(dashboard_recheck))
        .route("/api/v1/dashboard", get(dashboard_view))
        // Runs
        .route("/api/v1/runs", post(start_run))
        .route("/api/v1/runs/last", get(last_run))
        .route("/api/v1/recheck", post(recheck))
        // Stored results
        .route("/api/v1/results/:probe", get(get_result).delete(delete_result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalError(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::InternalError(msg) => msg,
        }
    }
}

impl From<ProberError> for ApiError {
    fn from(err: ProberError) -> Self {
        match err {
            ProberError::UnknownProbe(id) => ApiError::NotFound(format!("unknown probe '{}'", id)),
            e if e.is_user_error() => ApiError::BadRequest(e.to_string()),
            e => ApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error_code().to_string(),
            message: self.message().to_string(),
            request_id: Uuid::new_v4(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub request_id: Uuid,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub probes: usize,
}

/// Run request; an empty or missing list runs every probe
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub probes: Vec<String>,
}

impl RunRequest {
    /// Parse a run request; an empty body selects every probe
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid run request: {}", e)))
    }
}

/// Recheck request
#[derive(Debug, Deserialize)]
pub struct RecheckRequest {
    pub probe: String,
}

/// Recheck acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct RecheckAccepted {
    pub probe: String,
    pub status: String,
}

/// Stored result of one probe
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub probe_id: String,
    #[serde(flatten)]
    pub state: ProbeState,
}

fn ensure_registered(state: &AppState, probe_id: &str) -> Result<(), ApiError> {
    if state.registry.contains(probe_id) {
        Ok(())
    } else {
        Err(ProberError::UnknownProbe(probe_id.to_string()).into())
    }
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        probes: state.registry.len(),
    })
}

/// Prometheus scrape endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Dashboard as JSON
async fn dashboard_view(State(state): State<Arc<AppState>>) -> Json<DashboardView> {
    Json(state.dashboard.render().await)
}

/// Dashboard as an HTML page
async fn dashboard_page(State(state): State<Arc<AppState>>) -> Html<String> {
    let view = state.dashboard.render().await;
    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>AWS Account Health</title></head>\n<body>\n<h1>AWS Account Health</h1>\n",
    );
    if view.run_triggered {
        page.push_str("<p><em>Some checks are being evaluated, reload in a minute.</em></p>\n");
    }
    page.push_str(&render_html(&view, Some(DASHBOARD_RECHECK_PATH)));
    page.push_str("</body>\n</html>\n");
    Html(page)
}

/// Recheck form target of the HTML dashboard
async fn dashboard_recheck(
    State(state): State<Arc<AppState>>,
    Path(probe): Path<String>,
) -> Result<Redirect, ApiError> {
    state.dashboard.recheck(&probe)?;
    Ok(Redirect::to("/dashboard"))
}

/// Run a pass and return its outcome
async fn start_run(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<EvaluationRun>, ApiError> {
    let request = RunRequest::from_body(&body)?;

    let run = if request.probes.is_empty() {
        state.orchestrator.run().await
    } else {
        state.orchestrator.run_probes(&request.probes).await?
    };
    Ok(Json(run))
}

/// Most recently finished run
async fn last_run(State(state): State<Arc<AppState>>) -> Result<Json<EvaluationRun>, ApiError> {
    state
        .orchestrator
        .last_run()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no run has finished yet".to_string()))
}

/// Start a background re-evaluation of one probe
async fn recheck(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecheckRequest>,
) -> Result<(StatusCode, Json<RecheckAccepted>), ApiError> {
    state.dashboard.recheck(&request.probe)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RecheckAccepted {
            probe: request.probe,
            status: "accepted".to_string(),
        }),
    ))
}

/// Stored result of one probe; 404 with an `unknown` state when absent
async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(probe): Path<String>,
) -> Result<(StatusCode, Json<ResultResponse>), ApiError> {
    ensure_registered(&state, &probe)?;

    let stored = state
        .store
        .get(&probe)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let (status, probe_state) = match stored {
        Some(result) => (
            StatusCode::OK,
            ProbeState::Known {
                status: ComplianceStatus::classify(&result.value),
                age_seconds: result.age_seconds(Utc::now()),
                observed_at: result.observed_at,
                value: result.value,
            },
        ),
        None => (StatusCode::NOT_FOUND, ProbeState::Unknown),
    };

    Ok((
        status,
        Json(ResultResponse {
            probe_id: probe,
            state: probe_state,
        }),
    ))
}

/// Evict one stored result now
async fn delete_result(
    State(state): State<Arc<AppState>>,
    Path(probe): Path<String>,
) -> Result<StatusCode, ApiError> {
    ensure_registered(&state, &probe)?;
    state
        .eviction
        .evict(&probe)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

//! HTTP service for the risk-scoring core.
//!
//! Exposes the narrow collaborator interface the dashboard and API clients
//! call into:
//!
//! - `GET  /health` — liveness, artifact fingerprint, usage counters
//! - `GET  /api/v1/features` — schema (name/default/min/max) for input controls
//! - `GET  /api/v1/template` — ordered CSV template columns
//! - `POST /api/v1/score` — single-company scoring with attribution
//! - `POST /api/v1/batch` — portfolio audit over JSON rows
//!
//! The fitted context is loaded once before serving and shared read-only.
//! When no artifact could be loaded the server runs degraded: `/health`
//! reports it and every scoring route answers 503, mirroring a fatal
//! `ModelUnavailable` without crashing the process.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::artifact::ModelContext;
use crate::batch::{score_rows, BatchResult, TableRow};
use crate::error::ScoreError;
use crate::schema::FeatureSpec;
use crate::ScoreResult;

// ---------------------------------------------------------------------------
// Configuration and state
// ---------------------------------------------------------------------------

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (defaults to 127.0.0.1:8080; use 0.0.0.0 to expose
    /// externally).
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080"
                .parse()
                .expect("valid default bind address"),
        }
    }
}

/// Shared server state: the immutable scoring context plus usage counters.
pub struct ServerState {
    /// `None` when no artifact was loaded — degraded mode.
    pub context: Option<Arc<ModelContext>>,
    pub start_time: Instant,
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
}

impl ServerState {
    pub fn new(context: Option<Arc<ModelContext>>) -> Self {
        Self {
            context,
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    fn context_or_unavailable(&self) -> Result<&Arc<ModelContext>, ScoreError> {
        self.context.as_ref().ok_or(ScoreError::ModelUnavailable)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub artifact_fingerprint: Option<String>,
    pub uptime_seconds: u64,
    pub requests_total: u64,
    pub requests_errored: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeaturesResponse {
    pub features: Vec<FeatureSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateResponse {
    pub columns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_status(err: &ScoreError) -> StatusCode {
    match err {
        ScoreError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ScoreError::MalformedInput(_) | ScoreError::MalformedBatchInput(_) => {
            StatusCode::BAD_REQUEST
        }
        // Dimension mismatches and the rest indicate bugs or broken
        // artifacts, not caller mistakes.
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(state: &ServerState, err: ScoreError) -> ApiError {
    state.total_errors.fetch_add(1, Ordering::Relaxed);
    warn!(error = %err, "request rejected");
    (
        error_status(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    Json(HealthResponse {
        status: if state.context.is_some() {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        artifact_fingerprint: state.context.as_ref().map(|c| c.fingerprint.clone()),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        requests_total: state.total_requests.load(Ordering::Relaxed),
        requests_errored: state.total_errors.load(Ordering::Relaxed),
    })
}

pub async fn features_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<FeaturesResponse>, ApiError> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    let ctx = state
        .context_or_unavailable()
        .map_err(|e| reject(&state, e))?;
    Ok(Json(FeaturesResponse {
        features: ctx.schema.specs().to_vec(),
    }))
}

pub async fn template_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<TemplateResponse>, ApiError> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    let ctx = state
        .context_or_unavailable()
        .map_err(|e| reject(&state, e))?;
    Ok(Json(TemplateResponse {
        columns: ctx.schema.template_columns(),
    }))
}

pub async fn score_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<serde_json::Map<String, Value>>,
) -> Result<Json<ScoreResult>, ApiError> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    let ctx = state
        .context_or_unavailable()
        .map_err(|e| reject(&state, e))?;

    // Boundary validation: loosely-typed payload becomes map<string, float>
    // here, once. Unknown keys are dropped by the vector builder; a
    // non-numeric value on a known feature is a caller error.
    let mut raw = std::collections::HashMap::with_capacity(body.len());
    for (key, value) in &body {
        match value.as_f64() {
            Some(v) => {
                raw.insert(key.clone(), v);
            }
            None if ctx.schema.position(key).is_some() => {
                return Err(reject(
                    &state,
                    ScoreError::MalformedInput(format!(
                        "feature `{key}`: expected a number, got {value}"
                    )),
                ));
            }
            None => {} // unknown non-numeric key, dropped
        }
    }

    let result = crate::score_single(ctx, &raw).map_err(|e| reject(&state, e))?;
    Ok(Json(result))
}

pub async fn batch_handler(
    State(state): State<Arc<ServerState>>,
    Json(rows): Json<Vec<TableRow>>,
) -> Result<Json<BatchResult>, ApiError> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    let ctx = state
        .context_or_unavailable()
        .map_err(|e| reject(&state, e))?;
    let result = score_rows(ctx, &rows).map_err(|e| reject(&state, e))?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Router and entry point
// ---------------------------------------------------------------------------

/// Build the application router over shared state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/features", get(features_handler))
        .route("/api/v1/template", get(template_handler))
        .route("/api/v1/score", post(score_handler))
        .route("/api/v1/batch", post(batch_handler))
        .with_state(state)
}

/// Run the HTTP service until the process exits.
pub async fn run_server(config: ServerConfig, context: Option<Arc<ModelContext>>) -> Result<()> {
    if context.is_none() {
        warn!("no artifact loaded; serving in degraded mode (503 on scoring routes)");
    }
    let state = Arc::new(ServerState::new(context));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "risk scoring service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;

use crate::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub database: ComponentStatus,
    pub database_latency_ms: u64,
}

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Call once on startup.
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Liveness plus a database ping; 503 when the database is unreachable.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let database = if db_result.is_ok() {
        ComponentStatus::Up
    } else {
        ComponentStatus::Down
    };
    if let Err(err) = &db_result {
        tracing::warn!(error = %err, "health check: database unreachable");
    }

    let response = HealthResponse {
        status: database,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: get_uptime_secs(),
        database,
        database_latency_ms: started.elapsed().as_millis() as u64,
    };
    let status_code = match database {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Prometheus text exposition of the in-process registry.
async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::METRICS.export_metrics(),
    )
}

async fn metrics_json() -> impl IntoResponse {
    Json(crate::metrics::METRICS.export_metrics_json())
}

/// Endpoints:
/// - GET /health        - database-backed health check
/// - GET /health/live   - liveness probe
/// - GET /metrics       - Prometheus text
/// - GET /metrics/json  - same counters as JSON
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/metrics", get(metrics_text))
        .route("/metrics/json", get(metrics_json))
}

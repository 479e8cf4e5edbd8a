//! Health check
//!
//! - GET /api/v1/health - Liveness and database ping

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::middleware::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
}

/// 200 when the database answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match state.pool.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Database ping failed");
            false
        }
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if database_ok { "ok" } else { "degraded" },
        database: if database_ok { "ok" } else { "unavailable" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.request_stats.uptime_seconds(),
        total_requests: state.request_stats.total_requests(),
        avg_response_time_ms: state.request_stats.avg_response_time_ms(),
    };
    (status, Json(body))
}

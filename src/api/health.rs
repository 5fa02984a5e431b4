//! Health endpoint
//!
//! - GET /api/health - run every registered check

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::api::middleware::AppState;

/// GET /api/health - 200 when healthy, 503 otherwise
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.run_checks().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

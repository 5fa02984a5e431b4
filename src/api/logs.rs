//! Client error logging
//!
//! - POST /api/logs/client-error - record an error reported by the admin UI

use axum::{
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::ApiError;
use crate::error::AppError;

/// Longest stack trace kept in the log
const MAX_STACK_LEN: usize = 8 * 1024;

/// Error report sent by a browser
#[derive(Debug, Deserialize)]
pub struct ClientErrorReport {
    #[serde(default)]
    pub message: String,
    pub stack: Option<String>,
    #[serde(alias = "componentStack")]
    pub component_stack: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "userAgent")]
    pub user_agent: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientErrorResponse {
    pub success: bool,
    pub id: Uuid,
}

/// POST /api/logs/client-error
pub async fn client_error_handler(
    headers: HeaderMap,
    Json(report): Json<ClientErrorReport>,
) -> Result<(StatusCode, Json<ClientErrorResponse>), ApiError> {
    let message = report.message.trim();
    if message.is_empty() {
        return Err(AppError::validation("message", "Error message is required").into());
    }

    let id = Uuid::new_v4();
    let user_agent = report.user_agent.as_deref().or_else(|| {
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
    });

    tracing::error!(
        report_id = %id,
        url = report.url.as_deref().unwrap_or("-"),
        user_agent = user_agent.unwrap_or("-"),
        timestamp = report.timestamp.as_deref().unwrap_or("-"),
        "Client error: {}",
        message
    );
    if let Some(stack) = &report.stack {
        tracing::debug!(report_id = %id, "Client stack: {}", truncate(stack, MAX_STACK_LEN));
    }
    if let Some(stack) = &report.component_stack {
        tracing::debug!(report_id = %id, "Component stack: {}", truncate(stack, MAX_STACK_LEN));
    }

    Ok((StatusCode::CREATED, Json(ClientErrorResponse { success: true, id })))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

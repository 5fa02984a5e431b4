//! Shared API state and the JSON error type
//!
//! Every handler returns `Result<_, ApiError>`; errors serialise as
//! `{ "error": { "code", "message", "details"? } }` with the HTTP status
//! derived from the code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::db::query::QueryError;
use crate::db::repositories::{SqlxBlogRepository, SqlxCategoryRepository};
use crate::db::{ConnectionError, ConnectionManager};
use crate::error::AppError;
use crate::health::HealthChecker;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connection: Arc<ConnectionManager>,
    pub health: Arc<HealthChecker>,
    /// Whether the blogs table has a full-text index, detected once
    blog_text_index: Arc<OnceCell<bool>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, connection: Arc<ConnectionManager>) -> Self {
        let health = HealthChecker::from_config(config.clone(), Some(connection.clone()));
        Self {
            config,
            connection,
            health: Arc::new(health),
            blog_text_index: Arc::new(OnceCell::new()),
        }
    }

    /// Blog store on the current connection
    pub async fn blogs(&self) -> Result<SqlxBlogRepository, ApiError> {
        let pool = self.connection.pool().await?;
        Ok(SqlxBlogRepository::new(pool).with_text_index_cache(self.blog_text_index.clone()))
    }

    /// Category store on the current connection
    pub async fn categories(&self) -> Result<SqlxCategoryRepository, ApiError> {
        let pool = self.connection.pool().await?;
        Ok(SqlxCategoryRepository::new(pool))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("SERVICE_UNAVAILABLE", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Map a repository or service failure.
    ///
    /// Rejected query fields become validation errors; anything else is
    /// logged and reported generically.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        if let Some(query_err) = err.downcast_ref::<QueryError>() {
            return Self::with_details(
                "VALIDATION_ERROR",
                query_err.to_string(),
                json!({ "field": query_err.field() }),
            );
        }
        if let Some(conn_err) = err.downcast_ref::<ConnectionError>() {
            return Self::service_unavailable(conn_err.to_string());
        }
        tracing::error!("Request failed: {:#}", err);
        Self::internal_error("Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        tracing::warn!("Request rejected: {}", err);
        Self::service_unavailable(err.to_string())
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let message = err.user_message();
        match err {
            AppError::Api { status, .. } => {
                let code = match status {
                    400 | 422 => "VALIDATION_ERROR",
                    401 => "UNAUTHORIZED",
                    403 => "FORBIDDEN",
                    404 => "NOT_FOUND",
                    409 => "CONFLICT",
                    429 => "RATE_LIMITED",
                    500..=599 => "UPSTREAM_ERROR",
                    _ => "INTERNAL_ERROR",
                };
                Self::new(code, message)
            }
            AppError::Network(_) => Self::service_unavailable(message),
            AppError::Validation { field, .. } => {
                Self::with_details("VALIDATION_ERROR", message, json!({ "field": field }))
            }
            AppError::Auth(_) => Self::unauthorized(message),
            AppError::Unexpected(detail) => {
                tracing::error!("Unexpected error: {}", detail);
                Self::internal_error(message)
            }
        }
    }
}

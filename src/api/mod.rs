//! API layer - HTTP handlers and routing
//!
//! - Health report
//! - Client error logging
//! - Read-only blog and category listings

pub mod blogs;
pub mod categories;
pub mod health;
pub mod logs;
pub mod middleware;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState};

/// Build the `/api` router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/logs/client-error", post(logs::client_error_handler))
        .nest("/blogs", blogs::router())
        .nest("/categories", categories::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = match state.config.server.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(
                "Invalid CORS origin '{}', allowing any origin",
                state.config.server.cors_origin
            );
            cors.allow_origin(Any)
        }
    };

    Router::new()
        .nest("/api", build_api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

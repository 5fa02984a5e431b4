//! Blog listing endpoints
//!
//! - GET /api/blogs - search with pagination
//! - GET /api/blogs/popular - most viewed published blogs
//! - GET /api/blogs/stats - aggregate counters
//! - GET /api/blogs/{id}/related - published blogs sharing a category or tag

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::db::query::Projection;
use crate::db::repositories::BlogRepository;
use crate::models::{Blog, Paginated};
use crate::services::query::{self, BlogStats, PopularOptions, SearchParams};

/// Keys kept by a projection regardless of the selected fields
const POPULATED_KEYS: &[&str] = &["author", "category"];

/// Build the blogs router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_blogs))
        .route("/popular", get(popular_blogs))
        .route("/stats", get(blog_stats))
        .route("/{id}/related", get(related_blogs))
}

/// GET /api/blogs
async fn list_blogs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Paginated<serde_json::Value>>, ApiError> {
    let projection = Projection::parse(params.select.as_deref());
    let repo = state.blogs().await?;
    let page = query::search(&repo, params)
        .await
        .map_err(ApiError::from_anyhow)?;

    Ok(Json(project(page, &projection)?))
}

/// GET /api/blogs/popular
async fn popular_blogs(
    State(state): State<AppState>,
    Query(options): Query<PopularOptions>,
) -> Result<Json<Vec<Blog>>, ApiError> {
    let repo = state.blogs().await?;
    let blogs = query::popular(&repo, options)
        .await
        .map_err(ApiError::from_anyhow)?;
    Ok(Json(blogs))
}

/// GET /api/blogs/stats
async fn blog_stats(State(state): State<AppState>) -> Result<Json<BlogStats>, ApiError> {
    let repo = state.blogs().await?;
    let stats = query::stats(&repo).await.map_err(ApiError::from_anyhow)?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct RelatedQuery {
    pub limit: Option<u32>,
}

/// GET /api/blogs/{id}/related
async fn related_blogs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<RelatedQuery>,
) -> Result<Json<Vec<Blog>>, ApiError> {
    let repo = state.blogs().await?;
    let blog = repo
        .get_by_id(id)
        .await
        .map_err(ApiError::from_anyhow)?
        .ok_or_else(|| ApiError::not_found(format!("Blog {} not found", id)))?;

    let blogs = query::related(&repo, &blog, params.limit)
        .await
        .map_err(ApiError::from_anyhow)?;
    Ok(Json(blogs))
}

/// Serialise a page, dropping fields outside the projection
fn project(page: Paginated<Blog>, projection: &Projection) -> Result<Paginated<serde_json::Value>, ApiError> {
    let mut data = Vec::with_capacity(page.data.len());
    for blog in page.data {
        let value = serde_json::to_value(blog).map_err(|e| ApiError::from_anyhow(e.into()))?;
        data.push(projection.apply(value, POPULATED_KEYS));
    }
    Ok(Paginated {
        data,
        pagination: page.pagination,
    })
}

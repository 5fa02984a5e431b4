//! Category endpoints
//!
//! - GET /api/categories - paginated category table

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::db::query::{Filter, Projection, Sort, SortDirection};
use crate::models::{Category, Paginated};
use crate::services::query::{self, PaginateOptions};

/// Query parameters for listing categories
#[derive(Debug, Default, Deserialize)]
pub struct ListCategoriesQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Substring of the name or description
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortDirection>,
    pub select: Option<String>,
}

/// Build the categories router
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_categories))
}

/// GET /api/categories
async fn list_categories(
    State(state): State<AppState>,
    Query(params): Query<ListCategoriesQuery>,
) -> Result<Json<Paginated<serde_json::Value>>, ApiError> {
    let mut filter = Filter::new();
    if let Some(text) = params.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        filter = filter.contains_any(&["name", "description"], text);
    }

    let sort_field = params.sort_by.as_deref().unwrap_or("name");
    let projection = Projection::parse(params.select.as_deref());
    let options = PaginateOptions {
        page: params.page,
        limit: params.limit,
        sort: Sort::by(sort_field, params.sort_order.unwrap_or(SortDirection::Asc)),
        select: projection.clone(),
        ..Default::default()
    };

    let repo = state.categories().await?;
    let page: Paginated<Category> = query::paginate(&repo, filter, options)
        .await
        .map_err(ApiError::from_anyhow)?;

    let mut data = Vec::with_capacity(page.data.len());
    for category in page.data {
        let value = serde_json::to_value(category).map_err(|e| ApiError::from_anyhow(e.into()))?;
        data.push(projection.apply(value, &[]));
    }
    Ok(Json(Paginated {
        data,
        pagination: page.pagination,
    }))
}

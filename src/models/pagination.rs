//! Pagination types shared by every listing
//!
//! The envelope serialises as
//! `{ data, pagination: { page, limit, total, totalPages, hasNextPage, hasPrevPage, nextPage, prevPage } }`.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Normalised page/limit pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    /// Page number (1-indexed)
    pub page: u32,
    /// Items per page
    pub limit: u32,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageParams {
    /// Apply defaults and clamp: page >= 1, limit in 1..=100
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(DEFAULT_PAGE).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    /// Rows to skip
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.limit as i64
    }

    pub fn limit(&self) -> i64 {
        self.limit as i64
    }
}

/// Position of a page within the full result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub next_page: Option<u32>,
    pub prev_page: Option<u32>,
}

impl Pagination {
    pub fn new(params: PageParams, total: i64) -> Self {
        let total = total.max(0);
        let limit = params.limit.max(1) as i64;
        let total_pages = ((total + limit - 1) / limit) as u32;
        let has_next_page = params.page < total_pages;
        let has_prev_page = params.page > 1;

        Self {
            page: params.page,
            limit: params.limit,
            total,
            total_pages,
            has_next_page,
            has_prev_page,
            next_page: has_next_page.then(|| params.page + 1),
            prev_page: has_prev_page.then(|| params.page - 1),
        }
    }
}

/// Paginated result container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Items in the current page
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, params: PageParams) -> Self {
        Self {
            data,
            pagination: Pagination::new(params, total),
        }
    }

    /// Transform the items, keeping the pagination block
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

//! Category repository
//!
//! Database operations for categories.
//!
//! This module provides:
//! - `CategoryRepository` trait defining the interface for category data access
//! - `SqlxCategoryRepository` implementing it, plus `Collection` so the query
//!   helper can paginate categories

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::query::{Collection, Filter, FindQuery, GroupCount};
use crate::db::sql::{self, Dialect, TableSpec};
use crate::db::DynDatabasePool;
use crate::models::{Category, CategorySummary, CreateCategoryInput};
use crate::services::slug::{generate_slug, numbered_slug};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

pub const CATEGORIES: TableSpec = TableSpec {
    name: "categories",
    columns: &["id", "name", "slug", "description", "created_at", "updated_at"],
    numeric: &[],
    text_columns: &["name", "description"],
    tags: None,
};

/// Attempts at a numbered slug before giving up
const MAX_SLUG_ATTEMPTS: u32 = 50;

/// Category repository trait
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Create a category, generating a unique slug when none is given
    async fn create(&self, input: &CreateCategoryInput) -> Result<Category>;

    /// Get category by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Category>>;

    /// Get category by slug
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    /// Delete a category; blogs keep their dangling category_id
    async fn delete(&self, id: i64) -> Result<()>;

    /// Check if a slug already exists
    async fn exists_by_slug(&self, slug: &str) -> Result<bool>;

    /// Summaries for the given ids; unknown ids are skipped
    async fn summaries(&self, ids: &[i64]) -> Result<Vec<CategorySummary>>;
}

/// SQLx-based category repository implementation
pub struct SqlxCategoryRepository {
    pool: DynDatabasePool,
}

impl SqlxCategoryRepository {
    /// Create a new SQLx category repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CategoryRepository> {
        Arc::new(Self::new(pool))
    }

    fn dialect(&self) -> Dialect {
        self.pool.driver().into()
    }

    async fn unique_slug(&self, base: &str) -> Result<String> {
        for n in 1..=MAX_SLUG_ATTEMPTS {
            let candidate = numbered_slug(base, n);
            if !self.exists_by_slug(&candidate).await? {
                return Ok(candidate);
            }
        }
        anyhow::bail!("No free slug for '{}'", base)
    }
}

#[async_trait]
impl CategoryRepository for SqlxCategoryRepository {
    async fn create(&self, input: &CreateCategoryInput) -> Result<Category> {
        let base = match input.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => generate_slug(slug),
            _ => generate_slug(&input.name),
        };
        let base = if base.is_empty() { "category".to_string() } else { base };
        let slug = self.unique_slug(&base).await?;

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_category_sqlite(sqlite_pool(&self.pool)?, input, &slug).await
            }
            DatabaseDriver::Mysql => {
                create_category_mysql(mysql_pool(&self.pool)?, input, &slug).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>> {
        let query = FindQuery::new(Filter::new().eq("id", id)).limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let query = FindQuery::new(Filter::new().eq("slug", slug)).limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let sql = "DELETE FROM categories WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql).bind(id).execute(sqlite_pool(&self.pool)?).await
                    .context("Failed to delete category")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql).bind(id).execute(mysql_pool(&self.pool)?).await
                    .context("Failed to delete category")?;
            }
        }
        Ok(())
    }

    async fn exists_by_slug(&self, slug: &str) -> Result<bool> {
        Ok(Collection::count(self, &Filter::new().eq("slug", slug)).await? > 0)
    }

    async fn summaries(&self, ids: &[i64]) -> Result<Vec<CategorySummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = FindQuery::new(Filter::new().any_of("id", ids.iter().copied()));
        Ok(self.find(&query).await?.iter().map(Category::summary).collect())
    }
}

#[async_trait]
impl Collection for SqlxCategoryRepository {
    type Item = Category;

    async fn find(&self, query: &FindQuery) -> Result<Vec<Category>> {
        let stmt = sql::select(&CATEGORIES, self.dialect(), query, &[])?;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sql::bind_sqlite(sqlx::query(&stmt.sql), &stmt.params)
                    .fetch_all(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to list categories")?;
                rows.iter().map(row_to_category_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sql::bind_mysql(sqlx::query(&stmt.sql), &stmt.params)
                    .fetch_all(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to list categories")?;
                rows.iter().map(row_to_category_mysql).collect()
            }
        }
    }

    async fn count(&self, filter: &Filter) -> Result<i64> {
        let stmt = sql::count(&CATEGORIES, self.dialect(), filter)?;
        sql::fetch_count(&self.pool, &stmt).await
    }

    async fn sum(&self, field: &str, filter: &Filter) -> Result<i64> {
        let stmt = sql::sum(&CATEGORIES, self.dialect(), field, filter)?;
        sql::fetch_total(&self.pool, &stmt).await
    }

    async fn group_count(&self, field: &str, filter: &Filter) -> Result<Vec<GroupCount>> {
        let stmt = sql::group_count(&CATEGORIES, self.dialect(), field, filter)?;
        sql::fetch_groups(&self.pool, &stmt).await
    }

    async fn has_text_index(&self) -> bool {
        false
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_category_sqlite(
    pool: &SqlitePool,
    input: &CreateCategoryInput,
    slug: &str,
) -> Result<Category> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO categories (name, slug, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.name)
    .bind(slug)
    .bind(&input.description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to create category '{}'", input.name))?;

    Ok(Category {
        id: result.last_insert_rowid(),
        name: input.name.clone(),
        slug: slug.to_string(),
        description: input.description.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Columns outside the projection take their defaults; decode errors propagate
fn row_to_category_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Category> {
    Ok(Category {
        id: row.try_get("id")?,
        name: sql::projected(row.try_get("name"))?,
        slug: sql::projected(row.try_get("slug"))?,
        description: sql::projected(row.try_get("description"))?,
        created_at: sql::projected(row.try_get("created_at"))?,
        updated_at: sql::projected(row.try_get("updated_at"))?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_category_mysql(
    pool: &MySqlPool,
    input: &CreateCategoryInput,
    slug: &str,
) -> Result<Category> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO categories (name, slug, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.name)
    .bind(slug)
    .bind(&input.description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to create category '{}'", input.name))?;

    Ok(Category {
        id: result.last_insert_id() as i64,
        name: input.name.clone(),
        slug: slug.to_string(),
        description: input.description.clone(),
        created_at: now,
        updated_at: now,
    })
}

fn row_to_category_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Category> {
    Ok(Category {
        id: row.try_get("id")?,
        name: sql::projected(row.try_get("name"))?,
        slug: sql::projected(row.try_get("slug"))?,
        description: sql::projected(row.try_get("description"))?,
        created_at: sql::projected(row.try_get("created_at"))?,
        updated_at: sql::projected(row.try_get("updated_at"))?,
    })
}

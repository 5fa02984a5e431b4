//! Blog repository
//!
//! Database operations for blogs.
//!
//! This module provides:
//! - `BlogRepository` trait for single-record access
//! - `SqlxBlogRepository` implementing it for SQLite and MySQL, plus
//!   `Collection` with tag loading and author/category population
//!
//! Tags live in `blog_tags`. MySQL deployments get a FULLTEXT index on
//! title, content and excerpt; SQLite deployments search with a caseless GLOB.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::query::{Collection, Filter, FindQuery, GroupCount, Populate};
use crate::db::repositories::{CategoryRepository, SqlxCategoryRepository, SqlxUserRepository, UserRepository};
use crate::db::sql::{self, Dialect, TableSpec, TagSpec};
use crate::db::DynDatabasePool;
use crate::models::{normalize_tags, Blog, BlogStatus, CreateBlogInput};
use crate::services::slug::{generate_slug, numbered_slug};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const BLOGS: TableSpec = TableSpec {
    name: "blogs",
    columns: &[
        "id",
        "title",
        "slug",
        "content",
        "excerpt",
        "author_id",
        "category_id",
        "status",
        "featured",
        "views",
        "likes",
        "meta_title",
        "meta_description",
        "meta_keywords",
        "published_at",
        "created_at",
        "updated_at",
    ],
    numeric: &["views", "likes"],
    text_columns: &["title", "content", "excerpt"],
    tags: Some(TagSpec {
        table: "blog_tags",
        owner_column: "blog_id",
        value_column: "tag",
    }),
};

/// Name of the MySQL FULLTEXT index created by the migrations
const FULLTEXT_INDEX: &str = "ft_blogs_text";

const MAX_SLUG_ATTEMPTS: u32 = 50;

/// Blog repository trait
#[async_trait]
pub trait BlogRepository: Send + Sync {
    /// Create a blog with its tags, generating a unique slug when none is given
    async fn create(&self, input: &CreateBlogInput) -> Result<Blog>;

    /// Get blog by ID, tags included
    async fn get_by_id(&self, id: i64) -> Result<Option<Blog>>;

    /// Get blog by slug, tags included
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Blog>>;

    /// Delete a blog and its tags
    async fn delete(&self, id: i64) -> Result<()>;

    /// Add one view
    async fn increment_views(&self, id: i64) -> Result<()>;

    /// Check if a slug already exists
    async fn exists_by_slug(&self, slug: &str) -> Result<bool>;
}

/// SQLx-based blog repository implementation
pub struct SqlxBlogRepository {
    pool: DynDatabasePool,
    text_index: Arc<OnceCell<bool>>,
}

impl SqlxBlogRepository {
    /// Create a new SQLx blog repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self {
            pool,
            text_index: Arc::new(OnceCell::new()),
        }
    }

    /// Share the text index detection result with other repositories on the same database
    pub fn with_text_index_cache(mut self, cache: Arc<OnceCell<bool>>) -> Self {
        self.text_index = cache;
        self
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

    async fn find_one(&self, filter: Filter) -> Result<Option<Blog>> {
        let query = FindQuery::new(filter).limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    /// Fill `tags` for every blog in place
    async fn attach_tags(&self, blogs: &mut [Blog]) -> Result<()> {
        if blogs.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = blogs.iter().map(|b| b.id).collect();
        let mut tags = match self.pool.driver() {
            DatabaseDriver::Sqlite => load_tags_sqlite(sqlite_pool(&self.pool)?, &ids).await?,
            DatabaseDriver::Mysql => load_tags_mysql(mysql_pool(&self.pool)?, &ids).await?,
        };
        for blog in blogs.iter_mut() {
            blog.tags = tags.remove(&blog.id).unwrap_or_default();
        }
        Ok(())
    }

    /// Resolve author and category summaries in one query each
    async fn populate(&self, blogs: &mut [Blog], populate: Populate) -> Result<()> {
        if populate.author {
            let mut ids: Vec<i64> = blogs.iter().map(|b| b.author_id).collect();
            ids.sort_unstable();
            ids.dedup();
            let authors: HashMap<i64, _> = SqlxUserRepository::new(self.pool.clone())
                .summaries(&ids)
                .await?
                .into_iter()
                .map(|a| (a.id, a))
                .collect();
            for blog in blogs.iter_mut() {
                blog.author = authors.get(&blog.author_id).cloned();
            }
        }

        if populate.category {
            let mut ids: Vec<i64> = blogs.iter().filter_map(|b| b.category_id).collect();
            ids.sort_unstable();
            ids.dedup();
            let categories: HashMap<i64, _> = SqlxCategoryRepository::new(self.pool.clone())
                .summaries(&ids)
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect();
            for blog in blogs.iter_mut() {
                blog.category = blog.category_id.and_then(|id| categories.get(&id).cloned());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlogRepository for SqlxBlogRepository {
    async fn create(&self, input: &CreateBlogInput) -> Result<Blog> {
        let base = match input.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => generate_slug(slug),
            _ => generate_slug(&input.title),
        };
        let base = if base.is_empty() { "post".to_string() } else { base };
        let slug = self.unique_slug(&base).await?;
        let tags = normalize_tags(&input.tags);

        let mut blog = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_blog_sqlite(sqlite_pool(&self.pool)?, input, &slug, &tags).await?
            }
            DatabaseDriver::Mysql => {
                create_blog_mysql(mysql_pool(&self.pool)?, input, &slug, &tags).await?
            }
        };
        blog.tags = tags;
        Ok(blog)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Blog>> {
        self.find_one(Filter::new().eq("id", id)).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Blog>> {
        self.find_one(Filter::new().eq("slug", slug)).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_blog_sqlite(sqlite_pool(&self.pool)?, id).await,
            DatabaseDriver::Mysql => delete_blog_mysql(mysql_pool(&self.pool)?, id).await,
        }
    }

    async fn increment_views(&self, id: i64) -> Result<()> {
        let sql = "UPDATE blogs SET views = views + 1 WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql).bind(id).execute(sqlite_pool(&self.pool)?).await
                    .context("Failed to increment views")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql).bind(id).execute(mysql_pool(&self.pool)?).await
                    .context("Failed to increment views")?;
            }
        }
        Ok(())
    }

    async fn exists_by_slug(&self, slug: &str) -> Result<bool> {
        Ok(Collection::count(self, &Filter::new().eq("slug", slug)).await? > 0)
    }
}

#[async_trait]
impl Collection for SqlxBlogRepository {
    type Item = Blog;

    async fn find(&self, query: &FindQuery) -> Result<Vec<Blog>> {
        let mut required = Vec::new();
        if query.populate.author {
            required.push("author_id");
        }
        if query.populate.category {
            required.push("category_id");
        }

        let stmt = sql::select(&BLOGS, self.dialect(), query, &required)?;
        let mut blogs: Vec<Blog> = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sql::bind_sqlite(sqlx::query(&stmt.sql), &stmt.params)
                    .fetch_all(sqlite_pool(&self.pool)?)
                    .await
                    .context("Failed to query blogs")?;
                rows.iter().map(row_to_blog_sqlite).collect::<Result<_>>()?
            }
            DatabaseDriver::Mysql => {
                let rows = sql::bind_mysql(sqlx::query(&stmt.sql), &stmt.params)
                    .fetch_all(mysql_pool(&self.pool)?)
                    .await
                    .context("Failed to query blogs")?;
                rows.iter().map(row_to_blog_mysql).collect::<Result<_>>()?
            }
        };

        if query.projection.includes(sql::TAGS_FIELD) {
            self.attach_tags(&mut blogs).await?;
        }
        if query.populate.any() {
            self.populate(&mut blogs, query.populate).await?;
        }
        Ok(blogs)
    }

    async fn count(&self, filter: &Filter) -> Result<i64> {
        let stmt = sql::count(&BLOGS, self.dialect(), filter)?;
        sql::fetch_count(&self.pool, &stmt).await
    }

    async fn sum(&self, field: &str, filter: &Filter) -> Result<i64> {
        let stmt = sql::sum(&BLOGS, self.dialect(), field, filter)?;
        sql::fetch_total(&self.pool, &stmt).await
    }

    async fn group_count(&self, field: &str, filter: &Filter) -> Result<Vec<GroupCount>> {
        let stmt = sql::group_count(&BLOGS, self.dialect(), field, filter)?;
        sql::fetch_groups(&self.pool, &stmt).await
    }

    async fn has_text_index(&self) -> bool {
        cached_flag(&self.text_index, || async {
            match self.pool.driver() {
                DatabaseDriver::Sqlite => Ok(false),
                DatabaseDriver::Mysql => detect_fulltext_mysql(mysql_pool(&self.pool)?).await,
            }
        })
        .await
    }
}

/// Run `detect` until it succeeds once; failures count as `false` and are retried next time
async fn cached_flag<F, Fut>(cell: &OnceCell<bool>, detect: F) -> bool
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    match cell.get_or_try_init(detect).await {
        Ok(found) => *found,
        Err(e) => {
            tracing::warn!("Could not inspect blog indexes: {:#}", e);
            false
        }
    }
}

fn tags_sql(n: usize) -> String {
    format!(
        "SELECT blog_id, tag FROM blog_tags WHERE blog_id IN ({}) ORDER BY tag",
        sql::placeholders(n)
    )
}

fn status_from_db(status: &str) -> BlogStatus {
    BlogStatus::from_str(status).unwrap_or_default()
}

fn published_at_for(status: BlogStatus, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (status == BlogStatus::Published).then_some(now)
}

fn blog_from_input(id: i64, input: &CreateBlogInput, slug: &str, now: DateTime<Utc>) -> Blog {
    Blog {
        id,
        title: input.title.clone(),
        slug: slug.to_string(),
        content: input.content.clone(),
        excerpt: input.excerpt.clone(),
        author_id: input.author_id,
        category_id: input.category_id,
        tags: Vec::new(),
        status: input.status,
        featured: input.featured,
        views: 0,
        likes: 0,
        meta_title: input.meta_title.clone(),
        meta_description: input.meta_description.clone(),
        meta_keywords: input.meta_keywords.clone(),
        published_at: published_at_for(input.status, now),
        created_at: now,
        updated_at: now,
        author: None,
        category: None,
    }
}

const INSERT_BLOG_SQL: &str = r#"
    INSERT INTO blogs (title, slug, content, excerpt, author_id, category_id, status, featured,
                       meta_title, meta_description, meta_keywords, published_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_blog_sqlite(
    pool: &SqlitePool,
    input: &CreateBlogInput,
    slug: &str,
    tags: &[String],
) -> Result<Blog> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(INSERT_BLOG_SQL)
        .bind(&input.title)
        .bind(slug)
        .bind(&input.content)
        .bind(&input.excerpt)
        .bind(input.author_id)
        .bind(input.category_id)
        .bind(input.status.as_str())
        .bind(input.featured)
        .bind(&input.meta_title)
        .bind(&input.meta_description)
        .bind(&input.meta_keywords)
        .bind(published_at_for(input.status, now))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create blog '{}'", input.title))?;
    let id = result.last_insert_rowid();

    for tag in tags {
        sqlx::query("INSERT INTO blog_tags (blog_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(&mut *tx)
            .await
            .context("Failed to tag blog")?;
    }

    tx.commit().await.context("Failed to commit blog")?;
    Ok(blog_from_input(id, input, slug, now))
}

async fn delete_blog_sqlite(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    sqlx::query("DELETE FROM blog_tags WHERE blog_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete blog tags")?;
    sqlx::query("DELETE FROM blogs WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete blog")?;
    tx.commit().await.context("Failed to commit delete")?;
    Ok(())
}

async fn load_tags_sqlite(pool: &SqlitePool, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
    let sql = tags_sql(ids.len());
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(pool).await.context("Failed to load tags")?;

    let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        tags.entry(row.try_get("blog_id")?)
            .or_default()
            .push(row.try_get("tag")?);
    }
    Ok(tags)
}

/// Columns outside the projection take their defaults; decode errors propagate
fn row_to_blog_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Blog> {
    let status: String = sql::projected(row.try_get("status"))?;
    Ok(Blog {
        id: row.try_get("id")?,
        title: sql::projected(row.try_get("title"))?,
        slug: sql::projected(row.try_get("slug"))?,
        content: sql::projected(row.try_get("content"))?,
        excerpt: sql::projected(row.try_get("excerpt"))?,
        author_id: sql::projected(row.try_get("author_id"))?,
        category_id: sql::projected(row.try_get("category_id"))?,
        tags: Vec::new(),
        status: status_from_db(&status),
        featured: sql::projected(row.try_get("featured"))?,
        views: sql::projected(row.try_get("views"))?,
        likes: sql::projected(row.try_get("likes"))?,
        meta_title: sql::projected(row.try_get("meta_title"))?,
        meta_description: sql::projected(row.try_get("meta_description"))?,
        meta_keywords: sql::projected(row.try_get("meta_keywords"))?,
        published_at: sql::projected(row.try_get("published_at"))?,
        created_at: sql::projected(row.try_get("created_at"))?,
        updated_at: sql::projected(row.try_get("updated_at"))?,
        author: None,
        category: None,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_blog_mysql(
    pool: &MySqlPool,
    input: &CreateBlogInput,
    slug: &str,
    tags: &[String],
) -> Result<Blog> {
    let now = Utc::now();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(INSERT_BLOG_SQL)
        .bind(&input.title)
        .bind(slug)
        .bind(&input.content)
        .bind(&input.excerpt)
        .bind(input.author_id)
        .bind(input.category_id)
        .bind(input.status.as_str())
        .bind(input.featured)
        .bind(&input.meta_title)
        .bind(&input.meta_description)
        .bind(&input.meta_keywords)
        .bind(published_at_for(input.status, now))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create blog '{}'", input.title))?;
    let id = result.last_insert_id() as i64;

    for tag in tags {
        sqlx::query("INSERT INTO blog_tags (blog_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(&mut *tx)
            .await
            .context("Failed to tag blog")?;
    }

    tx.commit().await.context("Failed to commit blog")?;
    Ok(blog_from_input(id, input, slug, now))
}

async fn delete_blog_mysql(pool: &MySqlPool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    sqlx::query("DELETE FROM blog_tags WHERE blog_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete blog tags")?;
    sqlx::query("DELETE FROM blogs WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete blog")?;
    tx.commit().await.context("Failed to commit delete")?;
    Ok(())
}

async fn load_tags_mysql(pool: &MySqlPool, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
    let sql = tags_sql(ids.len());
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(pool).await.context("Failed to load tags")?;

    let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        tags.entry(row.try_get("blog_id")?)
            .or_default()
            .push(row.try_get("tag")?);
    }
    Ok(tags)
}

async fn detect_fulltext_mysql(pool: &MySqlPool) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS count FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'blogs'
          AND INDEX_NAME = ? AND INDEX_TYPE = 'FULLTEXT'
        "#,
    )
    .bind(FULLTEXT_INDEX)
    .fetch_one(pool)
    .await
    .context("Failed to read index metadata")?;

    let count: i64 = row.try_get("count")?;
    Ok(count > 0)
}

fn row_to_blog_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Blog> {
    let status: String = sql::projected(row.try_get("status"))?;
    Ok(Blog {
        id: row.try_get("id")?,
        title: sql::projected(row.try_get("title"))?,
        slug: sql::projected(row.try_get("slug"))?,
        content: sql::projected(row.try_get("content"))?,
        excerpt: sql::projected(row.try_get("excerpt"))?,
        author_id: sql::projected(row.try_get("author_id"))?,
        category_id: sql::projected(row.try_get("category_id"))?,
        tags: Vec::new(),
        status: status_from_db(&status),
        featured: sql::projected(row.try_get("featured"))?,
        views: sql::projected(row.try_get("views"))?,
        likes: sql::projected(row.try_get("likes"))?,
        meta_title: sql::projected(row.try_get("meta_title"))?,
        meta_description: sql::projected(row.try_get("meta_description"))?,
        meta_keywords: sql::projected(row.try_get("meta_keywords"))?,
        published_at: sql::projected(row.try_get("published_at"))?,
        created_at: sql::projected(row.try_get("created_at"))?,
        updated_at: sql::projected(row.try_get("updated_at"))?,
        author: None,
        category: None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::query::{Projection, Sort, SortDirection};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{CreateCategoryInput, CreateUserInput};

    pub(crate) async fn setup_test_repo() -> (DynDatabasePool, SqlxBlogRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxBlogRepository::new(pool.clone());
        (pool, repo)
    }

    pub(crate) async fn create_author(pool: &DynDatabasePool, username: &str) -> i64 {
        SqlxUserRepository::new(pool.clone())
            .create(&CreateUserInput::new(username, format!("{}@example.com", username), "hash"))
            .await
            .expect("Failed to create author")
            .id
    }

    pub(crate) async fn create_category(pool: &DynDatabasePool, name: &str) -> i64 {
        SqlxCategoryRepository::new(pool.clone())
            .create(&CreateCategoryInput::new(name))
            .await
            .expect("Failed to create category")
            .id
    }

    #[tokio::test]
    async fn test_create_blog_with_tags() {
        let (pool, repo) = setup_test_repo().await;
        let author = create_author(&pool, "ada").await;

        let blog = repo
            .create(
                &CreateBlogInput::new("Hello, World!", "First post", author)
                    .with_tags(["Rust", "rust", " Web "])
                    .with_status(BlogStatus::Published),
            )
            .await
            .expect("Failed to create blog");

        assert_eq!(blog.slug, "hello-world");
        assert_eq!(blog.tags, vec!["rust", "web"]);
        assert!(blog.published_at.is_some());

        let found = repo.get_by_id(blog.id).await.unwrap().expect("exists");
        assert_eq!(found.title, "Hello, World!");
        assert_eq!(found.status, BlogStatus::Published);
        assert_eq!(found.tags, vec!["rust", "web"]);
        assert!(found.author.is_none());
    }

    #[tokio::test]
    async fn test_draft_has_no_published_at() {
        let (_, repo) = setup_test_repo().await;
        let blog = repo.create(&CreateBlogInput::new("Draft", "wip", 1)).await.unwrap();

        let found = repo.get_by_slug("draft").await.unwrap().expect("exists");
        assert_eq!(found.id, blog.id);
        assert!(found.published_at.is_none());
        assert_eq!(found.status, BlogStatus::Draft);
    }

    #[tokio::test]
    async fn test_duplicate_titles_get_numbered_slugs() {
        let (_, repo) = setup_test_repo().await;

        let first = repo.create(&CreateBlogInput::new("Same", "a", 1)).await.unwrap();
        let second = repo.create(&CreateBlogInput::new("Same", "b", 1)).await.unwrap();

        assert_eq!(first.slug, "same");
        assert_eq!(second.slug, "same-2");
    }

    #[tokio::test]
    async fn test_delete_blog_removes_tags() {
        let (pool, repo) = setup_test_repo().await;
        let blog = repo
            .create(&CreateBlogInput::new("Gone", "x", 1).with_tags(["tmp"]))
            .await
            .unwrap();

        repo.delete(blog.id).await.unwrap();

        assert!(repo.get_by_id(blog.id).await.unwrap().is_none());
        let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blog_tags")
            .fetch_one(pool.as_sqlite().unwrap())
            .await
            .unwrap();
        assert_eq!(tags, 0);
    }

    #[tokio::test]
    async fn test_increment_views() {
        let (_, repo) = setup_test_repo().await;
        let blog = repo.create(&CreateBlogInput::new("Counted", "x", 1)).await.unwrap();

        repo.increment_views(blog.id).await.unwrap();
        repo.increment_views(blog.id).await.unwrap();

        assert_eq!(repo.get_by_id(blog.id).await.unwrap().unwrap().views, 2);
        assert_eq!(repo.sum("views", &Filter::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_populates_author_and_category() {
        let (pool, repo) = setup_test_repo().await;
        let author = create_author(&pool, "grace").await;
        let category = create_category(&pool, "Compilers").await;

        repo.create(&CreateBlogInput::new("Parsing", "x", author).with_category(category))
            .await
            .unwrap();
        repo.create(&CreateBlogInput::new("Orphan", "x", 999)).await.unwrap();

        let query = FindQuery::new(Filter::new())
            .sort(Sort::by("title", SortDirection::Asc))
            .projection(Projection::parse(Some("title")))
            .populate(Populate::all());
        let blogs = repo.find(&query).await.unwrap();

        assert_eq!(blogs.len(), 2);
        assert_eq!(blogs[0].title, "Orphan");
        assert!(blogs[0].author.is_none());
        assert!(blogs[0].category.is_none());
        assert_eq!(blogs[1].author.as_ref().map(|a| a.username.as_str()), Some("grace"));
        assert_eq!(blogs[1].category.as_ref().map(|c| c.slug.as_str()), Some("compilers"));
        // Projection excluded content and tags
        assert!(blogs[1].content.is_empty());
    }

    async fn server_gone() -> Result<bool> {
        anyhow::bail!("server gone")
    }

    async fn index_found() -> Result<bool> {
        Ok(true)
    }

    #[tokio::test]
    async fn test_failed_index_detection_is_not_cached() {
        let cell = OnceCell::new();

        assert!(!cached_flag(&cell, server_gone).await);
        assert!(cell.get().is_none());

        assert!(cached_flag(&cell, index_found).await);
        assert!(cached_flag(&cell, server_gone).await);
        assert_eq!(cell.get(), Some(&true));
    }

    #[tokio::test]
    async fn test_corrupt_selected_column_is_an_error() {
        let (pool, repo) = setup_test_repo().await;
        let blog = repo.create(&CreateBlogInput::new("Broken", "x", 1)).await.unwrap();
        sqlx::query("UPDATE blogs SET created_at = 'not a date' WHERE id = ?")
            .bind(blog.id)
            .execute(sqlite_pool(&pool).unwrap())
            .await
            .unwrap();

        assert!(repo.find(&FindQuery::new(Filter::new())).await.is_err());

        // Not selected, so never decoded
        let query = FindQuery::new(Filter::new()).projection(Projection::parse(Some("title")));
        let blogs = repo.find(&query).await.unwrap();
        assert_eq!(blogs[0].title, "Broken");
    }

    #[tokio::test]
    async fn test_tag_filter_and_group_count() {
        let (_, repo) = setup_test_repo().await;
        repo.create(&CreateBlogInput::new("A", "x", 1).with_tags(["rust", "web"])).await.unwrap();
        repo.create(&CreateBlogInput::new("B", "x", 1).with_tags(["rust"])).await.unwrap();
        repo.create(&CreateBlogInput::new("C", "x", 1).with_tags(["go"])).await.unwrap();

        let rust = Collection::count(&repo, &Filter::new().any_of("tags", ["rust"])).await.unwrap();
        assert_eq!(rust, 2);

        let groups = repo.group_count("tags", &Filter::new()).await.unwrap();
        assert_eq!(groups[0], GroupCount { key: Some("rust".to_string()), count: 2 });
        assert_eq!(groups.len(), 3);
    }

    #[tokio::test]
    async fn test_sqlite_has_no_text_index() {
        let (_, repo) = setup_test_repo().await;
        assert!(!repo.has_text_index().await);
    }
}

//! User repository
//!
//! Database operations for users. Blogs only need author summaries from
//! here; account management itself lives outside this crate.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql_pool, sqlite_pool};
use crate::db::DynDatabasePool;
use crate::models::{CreateUserInput, User, UserRole, UserSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, input: &CreateUserInput) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// Byline summaries for the given ids; unknown ids are skipped
    async fn summaries(&self, ids: &[i64]) -> Result<Vec<UserSummary>>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, input: &CreateUserInput) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(sqlite_pool(&self.pool)?, input).await,
            DatabaseDriver::Mysql => create_user_mysql(mysql_pool(&self.pool)?, input).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(sqlite_pool(&self.pool)?, id).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(mysql_pool(&self.pool)?, id).await,
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_user_by_username_sqlite(sqlite_pool(&self.pool)?, username).await
            }
            DatabaseDriver::Mysql => {
                get_user_by_username_mysql(mysql_pool(&self.pool)?, username).await
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) as count FROM users";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .fetch_one(sqlite_pool(&self.pool)?)
                .await
                .context("Failed to count users")?
                .try_get("count")?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .fetch_one(mysql_pool(&self.pool)?)
                .await
                .context("Failed to count users")?
                .try_get("count")?,
        };
        Ok(count)
    }

    async fn summaries(&self, ids: &[i64]) -> Result<Vec<UserSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        match self.pool.driver() {
            DatabaseDriver::Sqlite => user_summaries_sqlite(sqlite_pool(&self.pool)?, ids).await,
            DatabaseDriver::Mysql => user_summaries_mysql(mysql_pool(&self.pool)?, ids).await,
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, display_name, role, created_at, updated_at";

fn summaries_sql(n: usize) -> String {
    format!(
        "SELECT id, username, display_name FROM users WHERE id IN ({}) ORDER BY id",
        vec!["?"; n].join(", ")
    )
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, input: &CreateUserInput) -> Result<User> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, display_name, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.username)
    .bind(&input.email)
    .bind(&input.password_hash)
    .bind(&input.display_name)
    .bind(input.role.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to create user '{}'", input.username))?;

    Ok(user_from_input(result.last_insert_rowid(), input, now))
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.map(|r| row_to_user_sqlite(&r)).transpose()
}

async fn get_user_by_username_sqlite(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by username")?;

    row.map(|r| row_to_user_sqlite(&r)).transpose()
}

async fn user_summaries_sqlite(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<UserSummary>> {
    let sql = summaries_sql(ids.len());
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to load author summaries")?;

    rows.iter()
        .map(|row| {
            Ok(UserSummary {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                display_name: row.try_get("display_name")?,
            })
        })
        .collect()
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        role: UserRole::from_str(&role).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, input: &CreateUserInput) -> Result<User> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, display_name, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.username)
    .bind(&input.email)
    .bind(&input.password_hash)
    .bind(&input.display_name)
    .bind(input.role.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to create user '{}'", input.username))?;

    Ok(user_from_input(result.last_insert_id() as i64, input, now))
}

async fn get_user_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.map(|r| row_to_user_mysql(&r)).transpose()
}

async fn get_user_by_username_mysql(pool: &MySqlPool, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by username")?;

    row.map(|r| row_to_user_mysql(&r)).transpose()
}

async fn user_summaries_mysql(pool: &MySqlPool, ids: &[i64]) -> Result<Vec<UserSummary>> {
    let sql = summaries_sql(ids.len());
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to load author summaries")?;

    rows.iter()
        .map(|row| {
            Ok(UserSummary {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                display_name: row.try_get("display_name")?,
            })
        })
        .collect()
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        role: UserRole::from_str(&role).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_input(id: i64, input: &CreateUserInput, now: chrono::DateTime<Utc>) -> User {
    User {
        id,
        username: input.username.clone(),
        email: input.email.clone(),
        password_hash: input.password_hash.clone(),
        display_name: input.display_name.clone(),
        role: input.role,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxUserRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxUserRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = setup_test_repo().await;

        let created = repo
            .create(&CreateUserInput::new("ada", "ada@example.com", "hash").with_role(UserRole::Editor))
            .await
            .expect("Failed to create user");
        assert!(created.id > 0);

        let found = repo.get_by_id(created.id).await.unwrap().expect("user exists");
        assert_eq!(found.username, "ada");
        assert_eq!(found.role, UserRole::Editor);
        assert_eq!(found.password_hash, "hash");

        let by_name = repo.get_by_username("ada").await.unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(created.id));
        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let repo = setup_test_repo().await;
        repo.create(&CreateUserInput::new("ada", "a@example.com", "h")).await.unwrap();

        let dup = repo.create(&CreateUserInput::new("ada", "b@example.com", "h")).await;
        assert!(dup.is_err());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_summaries() {
        let repo = setup_test_repo().await;
        let a = repo
            .create(&CreateUserInput::new("ada", "a@example.com", "h").with_display_name("Ada L."))
            .await
            .unwrap();
        let b = repo.create(&CreateUserInput::new("bob", "b@example.com", "h")).await.unwrap();

        let summaries = repo.summaries(&[b.id, a.id, 999]).await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].display_name.as_deref(), Some("Ada L."));
        assert_eq!(summaries[1].username, "bob");
        assert!(repo.summaries(&[]).await.unwrap().is_empty());
    }
}

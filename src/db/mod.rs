//! Database layer
//!
//! Supports SQLite (default, single-binary deployment) and MySQL. The driver
//! is inferred from the connection URL.
//!
//! # Architecture
//!
//! - `pool`: the `DatabasePool` abstraction over both backends
//! - `connection`: `ConnectionManager`, which owns the current pool, retries
//!   the initial connect and publishes status changes
//! - `query` / `sql`: backend-neutral find requests and their SQL compilation
//! - `repositories`: per-entity access
//!
//! # Usage
//!
//! ```ignore
//! use inkpost::config::DatabaseConfig;
//! use inkpost::db::{migrations, ConnectionManager};
//!
//! let config = DatabaseConfig::default();
//! let manager = ConnectionManager::from_config(&config);
//! let pool = manager.connect(&config.url).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

pub mod connection;
pub mod migrations;
pub mod pool;
pub mod query;
pub mod repositories;
pub mod sql;

pub use connection::{
    wait_for_signal, ConnectionError, ConnectionManager, ConnectionStatus, Connector, RetryPolicy,
    SqlxConnector,
};
pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
pub use query::{Collection, Filter, FindQuery, GroupCount, Populate, Projection, QueryError, Sort, SortDirection};

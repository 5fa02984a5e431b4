//! Compiles `FindQuery` requests into parameterised SQL
//!
//! Every field name is checked against the table's column list before it is
//! spliced into SQL; values are always bound as parameters.

use anyhow::{Context, Result};
use sqlx::mysql::{MySql, MySqlArguments};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::Row;

use super::pool::{mysql_pool, sqlite_pool, DynDatabasePool};
use super::query::{
    Condition, Filter, FindQuery, GroupCount, Projection, QueryError, SortDirection, SortKey, SqlValue,
};
use crate::config::DatabaseDriver;

/// Virtual field backed by a side table of (owner id, value) pairs
pub const TAGS_FIELD: &str = "tags";

/// Escape character used in MySQL LIKE patterns
const LIKE_ESCAPE: char = '!';

/// Side table holding a multi-valued field
#[derive(Debug, Clone, Copy)]
pub struct TagSpec {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub value_column: &'static str,
}

/// Whitelist for one table
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// Every selectable, filterable and sortable column
    pub columns: &'static [&'static str],
    /// Columns that may be summed
    pub numeric: &'static [&'static str],
    /// Columns covered by the full-text index, also the substring fallback
    pub text_columns: &'static [&'static str],
    pub tags: Option<TagSpec>,
}

impl TableSpec {
    fn column(&self, field: &str) -> Result<&'static str, QueryError> {
        self.columns
            .iter()
            .copied()
            .find(|c| *c == field)
            .ok_or_else(|| QueryError::UnknownField {
                collection: self.name.to_string(),
                field: field.to_string(),
            })
    }

    fn is_tags(&self, field: &str) -> bool {
        field == TAGS_FIELD && self.tags.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
}

impl From<DatabaseDriver> for Dialect {
    fn from(driver: DatabaseDriver) -> Self {
        match driver {
            DatabaseDriver::Sqlite => Dialect::Sqlite,
            DatabaseDriver::Mysql => Dialect::Mysql,
        }
    }
}

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

struct Builder<'a> {
    spec: &'a TableSpec,
    dialect: Dialect,
    params: Vec<SqlValue>,
}

impl<'a> Builder<'a> {
    fn new(spec: &'a TableSpec, dialect: Dialect) -> Self {
        Self {
            spec,
            dialect,
            params: Vec::new(),
        }
    }

    fn push(&mut self, value: SqlValue) -> &'static str {
        self.params.push(value);
        "?"
    }

    fn placeholders(&mut self, values: &[SqlValue]) -> String {
        values
            .iter()
            .map(|v| self.push(v.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn where_clause(&mut self, filter: &Filter) -> Result<String, QueryError> {
        if filter.is_empty() {
            return Ok(String::new());
        }
        let parts = filter
            .conditions
            .iter()
            .map(|c| self.condition(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }

    fn tag_subquery(&mut self, values: &[SqlValue]) -> String {
        let Some(tags) = self.spec.tags else {
            return "1 = 0".to_string();
        };
        if values.is_empty() {
            return "1 = 0".to_string();
        }
        let placeholders = self.placeholders(values);
        format!(
            "id IN (SELECT {} FROM {} WHERE {} IN ({}))",
            tags.owner_column, tags.table, tags.value_column, placeholders
        )
    }

    fn condition(&mut self, condition: &Condition) -> Result<String, QueryError> {
        Ok(match condition {
            Condition::Eq(field, value) if self.spec.is_tags(field) => {
                self.tag_subquery(std::slice::from_ref(value))
            }
            Condition::Eq(field, value) => {
                let col = self.spec.column(field)?;
                format!("{} = {}", col, self.push(value.clone()))
            }
            Condition::Ne(field, value) => {
                let col = self.spec.column(field)?;
                format!("{} <> {}", col, self.push(value.clone()))
            }
            Condition::AnyOf(field, values) if self.spec.is_tags(field) => self.tag_subquery(values),
            Condition::AnyOf(field, values) => {
                let col = self.spec.column(field)?;
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    format!("{} IN ({})", col, self.placeholders(values))
                }
            }
            Condition::Gte(field, value) => {
                let col = self.spec.column(field)?;
                format!("{} >= {}", col, self.push(value.clone()))
            }
            Condition::ContainsAny { fields, needle } => {
                let cols = fields
                    .iter()
                    .map(|f| self.spec.column(f))
                    .collect::<Result<Vec<_>, _>>()?;
                self.contains_any(&cols, needle)
            }
            Condition::TextSearch(text) => match self.dialect {
                Dialect::Mysql if !self.spec.text_columns.is_empty() => {
                    format!("{} > 0", self.match_against(text))
                }
                _ => {
                    if self.spec.text_columns.is_empty() {
                        return Err(QueryError::UnsupportedField {
                            field: self.spec.name.to_string(),
                            usage: "text search",
                        });
                    }
                    let cols = self.spec.text_columns.to_vec();
                    self.contains_any(&cols, text)
                }
            },
            Condition::Or(conditions) => {
                if conditions.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let parts = conditions
                        .iter()
                        .map(|c| self.condition(c))
                        .collect::<Result<Vec<_>, _>>()?;
                    format!("({})", parts.join(" OR "))
                }
            }
        })
    }

    /// Case-insensitive substring match over `cols`.
    ///
    /// SQLite's `LOWER` and `LIKE` only fold ASCII, so SQLite gets a GLOB
    /// pattern with a character class per cased letter instead.
    fn contains_any(&mut self, cols: &[&'static str], needle: &str) -> String {
        if cols.is_empty() {
            return "1 = 0".to_string();
        }
        let parts: Vec<String> = match self.dialect {
            Dialect::Sqlite => {
                let pattern = caseless_glob(needle);
                cols.iter()
                    .map(|col| {
                        format!(
                            "COALESCE({}, '') GLOB {}",
                            col,
                            self.push(SqlValue::Text(pattern.clone()))
                        )
                    })
                    .collect()
            }
            Dialect::Mysql => {
                let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
                cols.iter()
                    .map(|col| {
                        format!(
                            "LOWER(COALESCE({}, '')) LIKE {} ESCAPE '{}'",
                            col,
                            self.push(SqlValue::Text(pattern.clone())),
                            LIKE_ESCAPE
                        )
                    })
                    .collect()
            }
        };
        format!("({})", parts.join(" OR "))
    }

    fn match_against(&mut self, text: &str) -> String {
        format!(
            "MATCH({}) AGAINST ({} IN NATURAL LANGUAGE MODE)",
            self.spec.text_columns.join(", "),
            self.push(SqlValue::Text(text.to_string()))
        )
    }

    fn order_clause(&mut self, query: &FindQuery) -> Result<String, QueryError> {
        let mut parts = Vec::new();
        let mut tie_break = SortDirection::Desc;
        let mut has_id = false;

        for key in &query.sort.keys {
            match key {
                SortKey::Field { field, direction } => {
                    if self.spec.is_tags(field) {
                        return Err(QueryError::UnsupportedField {
                            field: field.clone(),
                            usage: "sorting",
                        });
                    }
                    let col = self.spec.column(field)?;
                    has_id |= col == "id";
                    if parts.is_empty() {
                        tie_break = *direction;
                    }
                    parts.push(format!("{} {}", col, direction.as_sql()));
                }
                SortKey::TextScore { query } => {
                    if self.dialect == Dialect::Mysql && !self.spec.text_columns.is_empty() {
                        let expr = self.match_against(query);
                        parts.push(format!("{} DESC", expr));
                    }
                }
            }
        }

        if !has_id {
            parts.push(format!("id {}", tie_break.as_sql()));
        }
        Ok(format!(" ORDER BY {}", parts.join(", ")))
    }

    fn window(&mut self, query: &FindQuery) -> String {
        match query.limit {
            Some(limit) => {
                self.push(SqlValue::Int(limit));
                self.push(SqlValue::Int(query.offset));
                " LIMIT ? OFFSET ?".to_string()
            }
            None if query.offset > 0 => {
                self.push(SqlValue::Int(query.offset));
                match self.dialect {
                    Dialect::Sqlite => " LIMIT -1 OFFSET ?".to_string(),
                    Dialect::Mysql => " LIMIT 18446744073709551615 OFFSET ?".to_string(),
                }
            }
            None => String::new(),
        }
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Columns to read for a projection, always including `id` and `required`
pub fn selected_columns(
    spec: &TableSpec,
    projection: &Projection,
    required: &[&str],
) -> Result<Vec<&'static str>, QueryError> {
    match projection {
        Projection::All => Ok(spec.columns.to_vec()),
        Projection::Fields(fields) => {
            for field in fields {
                if !spec.is_tags(field) {
                    spec.column(field)?;
                }
            }
            Ok(spec
                .columns
                .iter()
                .copied()
                .filter(|c| {
                    *c == "id" || required.contains(c) || fields.iter().any(|f| f == c)
                })
                .collect())
        }
    }
}

/// `SELECT <columns> FROM <table> WHERE .. ORDER BY .. LIMIT ..`
pub fn select(
    spec: &TableSpec,
    dialect: Dialect,
    query: &FindQuery,
    required: &[&str],
) -> Result<Statement, QueryError> {
    let columns = selected_columns(spec, &query.projection, required)?;
    let mut b = Builder::new(spec, dialect);
    let where_sql = b.where_clause(&query.filter)?;
    let order_sql = b.order_clause(query)?;
    let window_sql = b.window(query);
    let sql = format!(
        "SELECT {} FROM {}{}{}{}",
        columns.join(", "),
        spec.name,
        where_sql,
        order_sql,
        window_sql
    );
    Ok(b.finish(sql))
}

/// `SELECT COUNT(*) AS count ..`
pub fn count(spec: &TableSpec, dialect: Dialect, filter: &Filter) -> Result<Statement, QueryError> {
    let mut b = Builder::new(spec, dialect);
    let where_sql = b.where_clause(filter)?;
    let sql = format!("SELECT COUNT(*) AS count FROM {}{}", spec.name, where_sql);
    Ok(b.finish(sql))
}

/// Sum of a numeric column as `total`, zero when nothing matches
pub fn sum(spec: &TableSpec, dialect: Dialect, field: &str, filter: &Filter) -> Result<Statement, QueryError> {
    let col = spec.column(field)?;
    if !spec.numeric.contains(&col) {
        return Err(QueryError::UnsupportedField {
            field: field.to_string(),
            usage: "sum",
        });
    }
    let mut b = Builder::new(spec, dialect);
    let where_sql = b.where_clause(filter)?;
    let expr = match dialect {
        Dialect::Sqlite => format!("COALESCE(SUM({}), 0)", col),
        Dialect::Mysql => format!("CAST(COALESCE(SUM({}), 0) AS SIGNED)", col),
    };
    let sql = format!("SELECT {} AS total FROM {}{}", expr, spec.name, where_sql);
    Ok(b.finish(sql))
}

/// Matching rows grouped by a field, as (`group_key`, `count`) rows, largest first
pub fn group_count(spec: &TableSpec, dialect: Dialect, field: &str, filter: &Filter) -> Result<Statement, QueryError> {
    let as_text = match dialect {
        Dialect::Sqlite => "TEXT",
        Dialect::Mysql => "CHAR",
    };
    let mut b = Builder::new(spec, dialect);
    let where_sql = b.where_clause(filter)?;

    let sql = match spec.tags {
        Some(tags) if field == TAGS_FIELD => format!(
            "SELECT {value} AS group_key, COUNT(*) AS count FROM {tag_table} WHERE {owner} IN (SELECT id FROM {table}{where_sql}) GROUP BY {value} ORDER BY count DESC, group_key ASC",
            value = tags.value_column,
            tag_table = tags.table,
            owner = tags.owner_column,
            table = spec.name,
            where_sql = where_sql,
        ),
        _ => {
            let col = spec.column(field)?;
            format!(
                "SELECT CAST({col} AS {as_text}) AS group_key, COUNT(*) AS count FROM {table}{where_sql} GROUP BY {col} ORDER BY count DESC, group_key ASC",
                col = col,
                as_text = as_text,
                table = spec.name,
                where_sql = where_sql,
            )
        }
    };
    Ok(b.finish(sql))
}

/// Escape LIKE wildcards so the needle matches literally
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Decoded column value, or the default when the column was projected out.
///
/// Only a missing column is defaulted; decode failures are returned.
pub fn projected<T: Default>(value: Result<T, sqlx::Error>) -> Result<T, sqlx::Error> {
    match value {
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(T::default()),
        other => other,
    }
}

/// SQLite GLOB pattern matching `needle` anywhere, ignoring case.
///
/// Each letter with single-character case variants becomes a class such as
/// `[üÜ]`; the GLOB metacharacters `*`, `?` and `[` are matched literally.
pub fn caseless_glob(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() * 4 + 2);
    out.push('*');
    for c in needle.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => {
                let mut variants = vec![c];
                let lower = single_char(c.to_lowercase()).unwrap_or(c);
                for v in [Some(lower), single_char(c.to_uppercase()), single_char(lower.to_uppercase())]
                    .into_iter()
                    .flatten()
                {
                    if !variants.contains(&v) {
                        variants.push(v);
                    }
                }
                if variants.len() == 1 {
                    out.push(c);
                } else {
                    out.push('[');
                    out.extend(variants);
                    out.push(']');
                }
            }
        }
    }
    out.push('*');
    out
}

fn single_char(mut chars: impl Iterator<Item = char>) -> Option<char> {
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

pub fn bind_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Time(v) => query.bind(*v),
        };
    }
    query
}

pub fn bind_mysql<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Time(v) => query.bind(*v),
        };
    }
    query
}

// ============================================================================
// Execution helpers for statements whose result shape is fixed
// ============================================================================

/// Run a `count` statement
pub async fn fetch_count(pool: &DynDatabasePool, stmt: &Statement) -> Result<i64> {
    fetch_i64(pool, stmt, "count").await
}

/// Run a `sum` statement
pub async fn fetch_total(pool: &DynDatabasePool, stmt: &Statement) -> Result<i64> {
    fetch_i64(pool, stmt, "total").await
}

async fn fetch_i64(pool: &DynDatabasePool, stmt: &Statement, column: &str) -> Result<i64> {
    let value = match pool.driver() {
        DatabaseDriver::Sqlite => bind_sqlite(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_one(sqlite_pool(pool)?)
            .await
            .with_context(|| format!("Query failed: {}", stmt.sql))?
            .try_get(column)?,
        DatabaseDriver::Mysql => bind_mysql(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_one(mysql_pool(pool)?)
            .await
            .with_context(|| format!("Query failed: {}", stmt.sql))?
            .try_get(column)?,
    };
    Ok(value)
}

/// Run a `group_count` statement
pub async fn fetch_groups(pool: &DynDatabasePool, stmt: &Statement) -> Result<Vec<GroupCount>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            let rows = bind_sqlite(sqlx::query(&stmt.sql), &stmt.params)
                .fetch_all(sqlite_pool(pool)?)
                .await
                .with_context(|| format!("Query failed: {}", stmt.sql))?;
            rows.iter()
                .map(|row| {
                    Ok(GroupCount {
                        key: row.try_get("group_key")?,
                        count: row.try_get("count")?,
                    })
                })
                .collect()
        }
        DatabaseDriver::Mysql => {
            let rows = bind_mysql(sqlx::query(&stmt.sql), &stmt.params)
                .fetch_all(mysql_pool(pool)?)
                .await
                .with_context(|| format!("Query failed: {}", stmt.sql))?;
            rows.iter()
                .map(|row| {
                    Ok(GroupCount {
                        key: row.try_get("group_key")?,
                        count: row.try_get("count")?,
                    })
                })
                .collect()
        }
    }
}

/// `?, ?, ?` for `n` parameters
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

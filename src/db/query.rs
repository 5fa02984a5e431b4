//! Storage-agnostic query requests
//!
//! A `FindQuery` describes what to read (filter, sort, projection, population,
//! window) without saying how. `Collection` is the seam that executes it; the
//! SQL repositories are one implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A literal compared against a column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Time(v)
    }
}

/// One constraint on the selected records
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, SqlValue),
    Ne(String, SqlValue),
    /// Field matches any of the values; for `tags`, the record carries any of them
    AnyOf(String, Vec<SqlValue>),
    Gte(String, SqlValue),
    /// Case-insensitive substring match on any of the fields
    ContainsAny { fields: Vec<String>, needle: String },
    /// Full-text match against the collection's text index
    TextSearch(String),
    /// At least one nested condition holds
    Or(Vec<Condition>),
}

/// Conjunction of conditions. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.and(Condition::Eq(field.to_string(), value.into()))
    }

    pub fn ne(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.and(Condition::Ne(field.to_string(), value.into()))
    }

    pub fn gte(self, field: &str, value: impl Into<SqlValue>) -> Self {
        self.and(Condition::Gte(field.to_string(), value.into()))
    }

    pub fn any_of<V: Into<SqlValue>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.and(Condition::AnyOf(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn contains_any(self, fields: &[&str], needle: &str) -> Self {
        self.and(Condition::ContainsAny {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            needle: needle.to_string(),
        })
    }

    pub fn text_search(self, query: &str) -> Self {
        self.and(Condition::TextSearch(query.to_string()))
    }

    pub fn or(self, conditions: Vec<Condition>) -> Self {
        self.and(Condition::Or(conditions))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Field { field: String, direction: SortDirection },
    /// Relevance of a full-text match, best first
    TextScore { query: String },
}

/// Ordered list of sort keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort {
    pub keys: Vec<SortKey>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(field: &str, direction: SortDirection) -> Self {
        Self::new().then(field, direction)
    }

    pub fn then(mut self, field: &str, direction: SortDirection) -> Self {
        self.keys.push(SortKey::Field {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn then_text_score(mut self, query: &str) -> Self {
        self.keys.push(SortKey::TextScore {
            query: query.to_string(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Which fields to return. `id` is always included.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Fields(Vec<String>),
}

impl Projection {
    /// Parse a comma separated field list; blank means all fields
    pub fn parse(select: Option<&str>) -> Self {
        let fields: Vec<String> = select
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            Projection::All
        } else {
            Projection::Fields(fields)
        }
    }

    pub fn includes(&self, field: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Fields(fields) => field == "id" || fields.iter().any(|f| f == field),
        }
    }

    /// Drop unselected keys from a serialised record.
    ///
    /// `keep` lists extra keys that survive regardless, such as populated relations.
    pub fn apply(&self, value: serde_json::Value, keep: &[&str]) -> serde_json::Value {
        match (self, value) {
            (Projection::Fields(_), serde_json::Value::Object(map)) => serde_json::Value::Object(
                map.into_iter()
                    .filter(|(k, _)| self.includes(k) || keep.contains(&k.as_str()))
                    .collect(),
            ),
            (_, value) => value,
        }
    }
}

/// References to resolve inline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Populate {
    pub author: bool,
    pub category: bool,
}

impl Populate {
    pub fn all() -> Self {
        Self {
            author: true,
            category: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn any(&self) -> bool {
        self.author || self.category
    }
}

/// Complete read request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Sort,
    pub projection: Projection,
    pub populate: Populate,
    pub offset: i64,
    pub limit: Option<i64>,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn populate(mut self, populate: Populate) -> Self {
        self.populate = populate;
        self
    }

    pub fn window(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset.max(0);
        self.limit = Some(limit.max(0));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit.max(0));
        self
    }
}

/// Number of records sharing one value of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    /// Field value rendered as text; `None` for NULL
    pub key: Option<String>,
    pub count: i64,
}

/// Rejections raised before a request reaches storage
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown field '{field}' for {collection}")]
    UnknownField { collection: String, field: String },
    #[error("Field '{field}' cannot be used for {usage}")]
    UnsupportedField { field: String, usage: &'static str },
}

impl QueryError {
    pub fn field(&self) -> &str {
        match self {
            QueryError::UnknownField { field, .. } | QueryError::UnsupportedField { field, .. } => field,
        }
    }
}

/// A queryable set of records
#[async_trait]
pub trait Collection: Send + Sync {
    type Item: Send + Sync;

    /// Records matching the request
    async fn find(&self, query: &FindQuery) -> Result<Vec<Self::Item>>;

    /// Number of records matching the filter
    async fn count(&self, filter: &Filter) -> Result<i64>;

    /// Sum of a numeric field over matching records (0 when none match)
    async fn sum(&self, field: &str, filter: &Filter) -> Result<i64>;

    /// Matching records grouped by a field
    async fn group_count(&self, field: &str, filter: &Filter) -> Result<Vec<GroupCount>>;

    /// Whether `Condition::TextSearch` and `SortKey::TextScore` are backed by an index
    async fn has_text_index(&self) -> bool;
}

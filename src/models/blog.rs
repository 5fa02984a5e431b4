//! Blog model
//!
//! This module provides:
//! - `Blog` entity representing a post, with optional populated author and category
//! - `BlogStatus` enum for publication states
//! - `CreateBlogInput` used by the repository and test fixtures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CategorySummary, UserSummary};

/// Blog entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blog {
    /// Unique identifier
    pub id: i64,
    /// Post title
    pub title: String,
    /// URL-friendly slug (unique)
    pub slug: String,
    /// Markdown body
    pub content: String,
    /// Short summary for listings
    pub excerpt: Option<String>,
    /// Author user ID
    pub author_id: i64,
    /// Category ID
    pub category_id: Option<i64>,
    /// Lowercase tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Publication status
    pub status: BlogStatus,
    /// Shown in featured slots
    #[serde(default)]
    pub featured: bool,
    /// View count
    #[serde(default)]
    pub views: i64,
    /// Like count
    #[serde(default)]
    pub likes: i64,
    /// SEO title override
    pub meta_title: Option<String>,
    /// SEO description
    pub meta_description: Option<String>,
    /// SEO keywords
    pub meta_keywords: Option<String>,
    /// Publication timestamp
    pub published_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Populated author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<UserSummary>,
    /// Populated category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategorySummary>,
}

impl Blog {
    pub fn is_published(&self) -> bool {
        self.status == BlogStatus::Published
    }

    /// Whether this blog shares its category or any tag with `other`
    pub fn is_related_to(&self, other: &Blog) -> bool {
        if self.id == other.id {
            return false;
        }
        let same_category = self.category_id.is_some() && self.category_id == other.category_id;
        same_category || self.tags.iter().any(|t| other.tags.contains(t))
    }
}

/// Blog publication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlogStatus {
    /// Draft - not visible to public
    #[default]
    Draft,
    /// Published - visible to public
    Published,
    /// Archived - hidden but not deleted
    Archived,
}

impl BlogStatus {
    pub const ALL: [BlogStatus; 3] = [BlogStatus::Draft, BlogStatus::Published, BlogStatus::Archived];

    /// Convert status to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BlogStatus::Draft => "draft",
            BlogStatus::Published => "published",
            BlogStatus::Archived => "archived",
        }
    }

    /// Parse status from database string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(BlogStatus::Draft),
            "published" => Some(BlogStatus::Published),
            "archived" => Some(BlogStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input for creating a new blog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBlogInput {
    pub title: String,
    /// Slug; generated from the title when absent
    pub slug: Option<String>,
    pub content: String,
    pub excerpt: Option<String>,
    pub author_id: i64,
    pub category_id: Option<i64>,
    pub tags: Vec<String>,
    pub status: BlogStatus,
    pub featured: bool,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
}

impl CreateBlogInput {
    pub fn new(title: impl Into<String>, content: impl Into<String>, author_id: i64) -> Self {
        Self {
            title: title.into(),
            slug: None,
            content: content.into(),
            excerpt: None,
            author_id,
            category_id: None,
            tags: Vec::new(),
            status: BlogStatus::Draft,
            featured: false,
            meta_title: None,
            meta_description: None,
            meta_keywords: None,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn with_category(mut self, category_id: i64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: BlogStatus) -> Self {
        self.status = status;
        self
    }

    pub fn featured(mut self) -> Self {
        self.featured = true;
        self
    }
}

/// Lowercase, trim and de-duplicate tags, dropping empties and commas.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.replace(',', " ").trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

//! Services layer
//!
//! - `query`: pagination, search, related/popular lists and statistics
//! - `slug`: URL slug generation

pub mod query;
pub mod slug;

pub use query::{
    paginate, popular, related, search, stats, BlogStats, CategoryCount, PaginateOptions, PopularOptions,
    SearchParams,
};
pub use slug::{generate_slug, numbered_slug};

//! Data models
//!
//! Database entities (Blog, Category, User), their input types and the
//! pagination envelope returned by every listing.

mod blog;
mod category;
mod pagination;
mod user;

pub use blog::{normalize_tags, Blog, BlogStatus, CreateBlogInput};
pub use category::{Category, CategorySummary, CreateCategoryInput};
pub use pagination::{PageParams, Paginated, Pagination, DEFAULT_LIMIT, MAX_LIMIT};
pub use user::{CreateUserInput, User, UserRole, UserSummary};

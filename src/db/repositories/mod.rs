//! Database repositories
//!
//! Repository pattern implementations for database access. Blogs and
//! categories also implement `Collection`, which the query helper builds on.

pub mod blog;
pub mod category;
pub mod user;

pub use blog::{BlogRepository, SqlxBlogRepository, BLOGS};
pub use category::{CategoryRepository, SqlxCategoryRepository, CATEGORIES};
pub use user::{SqlxUserRepository, UserRepository};

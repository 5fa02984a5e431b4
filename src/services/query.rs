//! Query helper
//!
//! Listing operations shared by the blog and category endpoints:
//! - `paginate`: one page of any `Collection` plus its pagination block
//! - `search`: filtered blog listing with free-text matching
//! - `related` / `popular`: small published-only blog lists
//! - `stats`: aggregate blog counters
//!
//! Every function takes the collection explicitly, so tests can substitute
//! an in-memory implementation.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::query::{Collection, Condition, Filter, FindQuery, Populate, Projection, Sort, SortDirection, SqlValue};
use crate::models::{Blog, BlogStatus, PageParams, Paginated, MAX_LIMIT};

/// Fields the substring fallback searches when no text index exists
pub const SEARCH_FIELDS: &[&str] = &["title", "content", "excerpt"];

/// Default sort field for searches
pub const DEFAULT_SORT_FIELD: &str = "created_at";

/// Default size of the related and popular lists
pub const DEFAULT_SHORT_LIST: u32 = 5;

/// Upper bound for `PopularOptions::since_days`
const MAX_SINCE_DAYS: u32 = 36_500;

/// Options for `paginate`
#[derive(Debug, Clone, Default)]
pub struct PaginateOptions {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Sort,
    pub populate: Populate,
    pub select: Projection,
}

/// Fetch one page of `collection` together with the total match count.
///
/// The fetch and the count run concurrently.
pub async fn paginate<C>(collection: &C, filter: Filter, options: PaginateOptions) -> Result<Paginated<C::Item>>
where
    C: Collection + ?Sized,
{
    let params = PageParams::new(options.page, options.limit);
    let query = FindQuery::new(filter)
        .sort(options.sort)
        .projection(options.select)
        .populate(options.populate)
        .window(params.offset(), params.limit());

    let (data, total) = futures::try_join!(collection.find(&query), collection.count(&query.filter))?;
    Ok(Paginated::new(data, total, params))
}

/// Blog search parameters, deserialisable from a query string.
///
/// `tags` is comma separated and matches any of the listed tags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub category: Option<i64>,
    pub tags: Option<String>,
    pub featured: Option<bool>,
    pub author: Option<i64>,
    pub exclude: Option<i64>,
    pub status: Option<BlogStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortDirection>,
    pub select: Option<String>,
}

impl SearchParams {
    /// Trimmed free-text query, if any
    pub fn text(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    /// Lowercased tag list
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Structured part of the filter, without the free-text match
    fn base_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(status) = self.status {
            filter = filter.eq("status", status.as_str());
        }
        if let Some(category) = self.category {
            filter = filter.eq("category_id", category);
        }
        let tags = self.tag_list();
        if !tags.is_empty() {
            filter = filter.any_of("tags", tags);
        }
        if let Some(featured) = self.featured {
            filter = filter.eq("featured", featured);
        }
        if let Some(author) = self.author {
            filter = filter.eq("author_id", author);
        }
        if let Some(exclude) = self.exclude {
            filter = filter.ne("id", exclude);
        }
        filter
    }
}

/// Search blogs.
///
/// A free-text query uses the collection's text index when it has one,
/// ranking by relevance before the requested sort field. Without an index
/// it matches case-insensitive substrings of title, content and excerpt.
/// No status filter is applied unless `status` is given.
pub async fn search<C>(collection: &C, params: SearchParams) -> Result<Paginated<Blog>>
where
    C: Collection<Item = Blog> + ?Sized,
{
    let sort_field = params
        .sort_by
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_SORT_FIELD)
        .to_string();
    let direction = params.sort_order.unwrap_or_default();

    let mut filter = params.base_filter();
    let mut sort = Sort::new();

    if let Some(text) = params.text() {
        if collection.has_text_index().await {
            filter = filter.text_search(text);
            sort = sort.then_text_score(text);
        } else {
            filter = filter.contains_any(SEARCH_FIELDS, text);
        }
    }
    sort = sort.then(&sort_field, direction);

    let options = PaginateOptions {
        page: params.page,
        limit: params.limit,
        sort,
        populate: Populate::all(),
        select: Projection::parse(params.select.as_deref()),
    };
    paginate(collection, filter, options).await
}

/// Published blogs sharing a category or any tag with `blog`, most viewed first
pub async fn related<C>(collection: &C, blog: &Blog, limit: Option<u32>) -> Result<Vec<Blog>>
where
    C: Collection<Item = Blog> + ?Sized,
{
    let mut links = Vec::new();
    if let Some(category) = blog.category_id {
        links.push(Condition::Eq("category_id".to_string(), SqlValue::Int(category)));
    }
    if !blog.tags.is_empty() {
        links.push(Condition::AnyOf(
            "tags".to_string(),
            blog.tags.iter().map(|t| SqlValue::from(t.as_str())).collect(),
        ));
    }
    if links.is_empty() {
        return Ok(Vec::new());
    }

    let filter = Filter::new()
        .eq("status", BlogStatus::Published.as_str())
        .ne("id", blog.id)
        .or(links);
    let query = FindQuery::new(filter)
        .sort(Sort::by("views", SortDirection::Desc).then("created_at", SortDirection::Desc))
        .populate(Populate::all())
        .limit(short_list(limit));

    collection.find(&query).await
}

/// Options for `popular`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PopularOptions {
    pub limit: Option<u32>,
    pub category: Option<i64>,
    /// Only blogs published within this many days
    pub since_days: Option<u32>,
}

/// Published blogs ordered by views, then likes
pub async fn popular<C>(collection: &C, options: PopularOptions) -> Result<Vec<Blog>>
where
    C: Collection<Item = Blog> + ?Sized,
{
    let mut filter = Filter::new().eq("status", BlogStatus::Published.as_str());
    if let Some(category) = options.category {
        filter = filter.eq("category_id", category);
    }
    if let Some(days) = options.since_days {
        filter = filter.gte("published_at", Utc::now() - Duration::days(days.min(MAX_SINCE_DAYS) as i64));
    }

    let query = FindQuery::new(filter)
        .sort(
            Sort::by("views", SortDirection::Desc)
                .then("likes", SortDirection::Desc)
                .then("published_at", SortDirection::Desc),
        )
        .populate(Populate::all())
        .limit(short_list(options.limit));

    collection.find(&query).await
}

fn short_list(limit: Option<u32>) -> i64 {
    limit.unwrap_or(DEFAULT_SHORT_LIST).clamp(1, MAX_LIMIT) as i64
}

/// Blog count for one category (`None` for uncategorised)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category_id: Option<i64>,
    pub count: i64,
}

/// Aggregate blog counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogStats {
    pub total: i64,
    pub published: i64,
    pub draft: i64,
    pub archived: i64,
    pub featured: i64,
    pub total_views: i64,
    pub average_views: f64,
    pub by_category: Vec<CategoryCount>,
}

/// Compute `BlogStats` over every blog
pub async fn stats<C>(collection: &C) -> Result<BlogStats>
where
    C: Collection<Item = Blog> + ?Sized,
{
    let all = Filter::new();
    let by_status = |status: BlogStatus| Filter::new().eq("status", status.as_str());
    let (published_filter, draft_filter, archived_filter) = (
        by_status(BlogStatus::Published),
        by_status(BlogStatus::Draft),
        by_status(BlogStatus::Archived),
    );
    let featured_filter = Filter::new().eq("featured", true);

    let (total, published, draft, archived, featured, total_views, groups) = futures::try_join!(
        collection.count(&all),
        collection.count(&published_filter),
        collection.count(&draft_filter),
        collection.count(&archived_filter),
        collection.count(&featured_filter),
        collection.sum("views", &all),
        collection.group_count("category_id", &all),
    )?;

    let average_views = if total > 0 {
        (total_views as f64 / total as f64 * 100.0).round() / 100.0
    } else {
        0.0
    };

    let by_category = groups
        .into_iter()
        .map(|g| CategoryCount {
            category_id: g.key.as_deref().and_then(|k| k.parse().ok()),
            count: g.count,
        })
        .collect();

    Ok(BlogStats {
        total,
        published,
        draft,
        archived,
        featured,
        total_views,
        average_views,
        by_category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::{GroupCount, SortKey};
    use crate::db::repositories::blog::tests::{create_author, create_category, setup_test_repo};
    use crate::db::repositories::BlogRepository;
    use crate::db::DynDatabasePool;
    use crate::models::CreateBlogInput;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// In-memory blogs that records every request it receives
    struct FakeBlogs {
        items: Vec<Blog>,
        text_index: bool,
        seen: Mutex<Vec<FindQuery>>,
    }

    impl FakeBlogs {
        fn new(count: i64, text_index: bool) -> Self {
            Self {
                items: (1..=count)
                    .map(|id| Blog {
                        id,
                        title: format!("Blog {}", id),
                        ..Blog::default()
                    })
                    .collect(),
                text_index,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last_query(&self) -> FindQuery {
            self.seen.lock().unwrap().last().cloned().expect("no query recorded")
        }
    }

    #[async_trait]
    impl Collection for FakeBlogs {
        type Item = Blog;

        async fn find(&self, query: &FindQuery) -> Result<Vec<Blog>> {
            self.seen.lock().unwrap().push(query.clone());
            let limit = query.limit.unwrap_or(i64::MAX) as usize;
            Ok(self
                .items
                .iter()
                .skip(query.offset as usize)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn count(&self, _filter: &Filter) -> Result<i64> {
            Ok(self.items.len() as i64)
        }

        async fn sum(&self, _field: &str, _filter: &Filter) -> Result<i64> {
            Ok(0)
        }

        async fn group_count(&self, _field: &str, _filter: &Filter) -> Result<Vec<GroupCount>> {
            Ok(Vec::new())
        }

        async fn has_text_index(&self) -> bool {
            self.text_index
        }
    }

    async fn set_views(pool: &DynDatabasePool, id: i64, views: i64, likes: i64) {
        sqlx::query("UPDATE blogs SET views = ?, likes = ? WHERE id = ?")
            .bind(views)
            .bind(likes)
            .bind(id)
            .execute(pool.as_sqlite().unwrap())
            .await
            .unwrap();
    }

    fn published(title: &str) -> CreateBlogInput {
        CreateBlogInput::new(title, "body", 1).with_status(BlogStatus::Published)
    }

    #[tokio::test]
    async fn test_paginate_first_page() {
        let blogs = FakeBlogs::new(3, false);
        let options = PaginateOptions {
            page: Some(1),
            limit: Some(2),
            ..Default::default()
        };

        let page = paginate(&blogs, Filter::new(), options).await.unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);
        assert!(page.pagination.has_next_page);
        assert!(!page.pagination.has_prev_page);
        assert_eq!(page.pagination.next_page, Some(2));
        assert_eq!(page.pagination.prev_page, None);
    }

    #[tokio::test]
    async fn test_paginate_passes_projection_and_population_through() {
        let blogs = FakeBlogs::new(3, false);
        let options = PaginateOptions {
            page: Some(2),
            limit: Some(2),
            populate: Populate::all(),
            select: Projection::parse(Some("title")),
            ..Default::default()
        };

        let page = paginate(&blogs, Filter::new(), options).await.unwrap();
        let query = blogs.last_query();

        assert_eq!(page.data[0].id, 3);
        assert_eq!(query.offset, 2);
        assert_eq!(query.limit, Some(2));
        assert_eq!(query.populate, Populate::all());
        assert_eq!(query.projection, Projection::Fields(vec!["title".to_string()]));
    }

    #[tokio::test]
    async fn test_paginate_clamps_limit() {
        let blogs = FakeBlogs::new(1, false);
        let options = PaginateOptions {
            page: Some(0),
            limit: Some(1000),
            ..Default::default()
        };

        let page = paginate(&blogs, Filter::new(), options).await.unwrap();

        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.limit, MAX_LIMIT);
    }

    #[tokio::test]
    async fn test_search_with_text_index_ranks_by_relevance_first() {
        let blogs = FakeBlogs::new(2, true);
        let params = SearchParams {
            query: Some("  rust  ".to_string()),
            sort_by: Some("views".to_string()),
            ..Default::default()
        };

        search(&blogs, params).await.unwrap();
        let query = blogs.last_query();

        assert_eq!(query.filter, Filter::new().text_search("rust"));
        assert_eq!(
            query.sort.keys,
            vec![
                SortKey::TextScore { query: "rust".to_string() },
                SortKey::Field { field: "views".to_string(), direction: SortDirection::Desc },
            ]
        );
        assert_eq!(query.populate, Populate::all());
    }

    #[tokio::test]
    async fn test_search_without_text_index_uses_substring_match() {
        let blogs = FakeBlogs::new(2, false);
        let params = SearchParams {
            query: Some("Rust".to_string()),
            ..Default::default()
        };

        search(&blogs, params).await.unwrap();
        let query = blogs.last_query();

        assert_eq!(query.filter, Filter::new().contains_any(SEARCH_FIELDS, "Rust"));
        assert_eq!(query.sort, Sort::by(DEFAULT_SORT_FIELD, SortDirection::Desc));
    }

    #[tokio::test]
    async fn test_search_substring_is_case_insensitive() {
        let (_, repo) = setup_test_repo().await;
        repo.create(&published("Learning RUST")).await.unwrap();
        repo.create(&published("Gardening").with_excerpt("Rusty tools")).await.unwrap();
        repo.create(&CreateBlogInput::new("Cooking", "no rust here, just pans", 1)).await.unwrap();
        repo.create(&published("Unrelated")).await.unwrap();

        let params = SearchParams {
            query: Some("rust".to_string()),
            ..Default::default()
        };
        let page = search(&repo, params).await.unwrap();
        assert_eq!(page.pagination.total, 3);

        let params = SearchParams {
            query: Some("rust".to_string()),
            status: Some(BlogStatus::Published),
            sort_by: Some("title".to_string()),
            sort_order: Some(SortDirection::Asc),
            ..Default::default()
        };
        let page = search(&repo, params).await.unwrap();
        let titles: Vec<_> = page.data.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Gardening", "Learning RUST"]);
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let (_, repo) = setup_test_repo().await;
        repo.create(&published("Über Rust")).await.unwrap();
        repo.create(&published("Uber rides")).await.unwrap();

        for needle in ["über", "ÜBER", "üBeR"] {
            let params = SearchParams {
                query: Some(needle.to_string()),
                ..Default::default()
            };
            let page = search(&repo, params).await.unwrap();
            assert_eq!(page.pagination.total, 1, "needle {}", needle);
            assert_eq!(page.data[0].title, "Über Rust");
        }
    }

    #[tokio::test]
    async fn test_search_structured_filters() {
        let (pool, repo) = setup_test_repo().await;
        let author = create_author(&pool, "ada").await;
        let category = create_category(&pool, "Systems").await;

        let keep = repo
            .create(
                &CreateBlogInput::new("Kept", "x", author)
                    .with_category(category)
                    .with_tags(["rust"])
                    .featured(),
            )
            .await
            .unwrap();
        repo.create(&CreateBlogInput::new("Other author", "x", 99).with_category(category).with_tags(["rust"]).featured())
            .await
            .unwrap();
        repo.create(&CreateBlogInput::new("Not featured", "x", author).with_category(category).with_tags(["rust"]))
            .await
            .unwrap();

        let params: SearchParams = serde_json::from_value(serde_json::json!({
            "category": category,
            "tags": "Go, RUST",
            "featured": true,
            "author": author,
        }))
        .unwrap();
        let page = search(&repo, params).await.unwrap();

        assert_eq!(page.len(), 1);
        assert_eq!(page.data[0].id, keep.id);
        assert_eq!(page.data[0].author.as_ref().map(|a| a.username.as_str()), Some("ada"));

        let params = SearchParams {
            exclude: Some(keep.id),
            ..Default::default()
        };
        assert_eq!(search(&repo, params).await.unwrap().pagination.total, 2);
    }

    #[tokio::test]
    async fn test_search_rejects_unknown_sort_field() {
        let (_, repo) = setup_test_repo().await;
        let params = SearchParams {
            sort_by: Some("password".to_string()),
            ..Default::default()
        };

        let err = search(&repo, params).await.unwrap_err();
        assert!(err.downcast_ref::<crate::db::QueryError>().is_some());
    }

    #[tokio::test]
    async fn test_related_shares_category_or_tag() {
        let (pool, repo) = setup_test_repo().await;
        let systems = create_category(&pool, "Systems").await;
        let other = create_category(&pool, "Other").await;

        let base = repo.create(&published("Base").with_category(systems).with_tags(["rust"])).await.unwrap();
        let same_category = repo.create(&published("Same category").with_category(systems)).await.unwrap();
        let shared_tag = repo.create(&published("Shared tag").with_category(other).with_tags(["rust", "web"])).await.unwrap();
        repo.create(&published("Unrelated").with_category(other).with_tags(["go"])).await.unwrap();
        repo.create(&CreateBlogInput::new("Draft", "x", 1).with_category(systems)).await.unwrap();
        set_views(&pool, same_category.id, 5, 0).await;
        set_views(&pool, shared_tag.id, 10, 0).await;

        let found = related(&repo, &base, None).await.unwrap();
        let ids: Vec<_> = found.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![shared_tag.id, same_category.id]);

        let one = related(&repo, &base, Some(1)).await.unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_related_without_links_is_empty() {
        let blogs = FakeBlogs::new(3, false);
        let lonely = Blog { id: 1, ..Blog::default() };

        assert!(related(&blogs, &lonely, None).await.unwrap().is_empty());
        assert!(blogs.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_popular_orders_by_views_then_likes() {
        let (pool, repo) = setup_test_repo().await;
        let systems = create_category(&pool, "Systems").await;

        let a = repo.create(&published("A").with_category(systems)).await.unwrap();
        let b = repo.create(&published("B")).await.unwrap();
        let c = repo.create(&published("C").with_category(systems)).await.unwrap();
        let draft = repo.create(&CreateBlogInput::new("Draft", "x", 1)).await.unwrap();
        set_views(&pool, a.id, 10, 1).await;
        set_views(&pool, b.id, 10, 7).await;
        set_views(&pool, c.id, 3, 0).await;
        set_views(&pool, draft.id, 100, 0).await;

        let top = popular(&repo, PopularOptions::default()).await.unwrap();
        let ids: Vec<_> = top.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);

        let options = PopularOptions {
            category: Some(systems),
            since_days: Some(7),
            limit: Some(1),
        };
        let top = popular(&repo, options).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, a.id);
        assert_eq!(top[0].category.as_ref().map(|c| c.name.as_str()), Some("Systems"));
    }

    #[tokio::test]
    async fn test_stats() {
        let (pool, repo) = setup_test_repo().await;
        let systems = create_category(&pool, "Systems").await;

        let a = repo.create(&published("A").with_category(systems).featured()).await.unwrap();
        let b = repo.create(&published("B").with_category(systems)).await.unwrap();
        repo.create(&CreateBlogInput::new("C", "x", 1)).await.unwrap();
        repo.create(&CreateBlogInput::new("D", "x", 1).with_status(BlogStatus::Archived)).await.unwrap();
        set_views(&pool, a.id, 7, 0).await;
        set_views(&pool, b.id, 3, 0).await;

        let stats = stats(&repo).await.unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.draft, 1);
        assert_eq!(stats.archived, 1);
        assert_eq!(stats.featured, 1);
        assert_eq!(stats.total_views, 10);
        assert_eq!(stats.average_views, 2.5);
        assert_eq!(
            stats.by_category,
            vec![
                CategoryCount { category_id: None, count: 2 },
                CategoryCount { category_id: Some(systems), count: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let (_, repo) = setup_test_repo().await;
        let stats = stats(&repo).await.unwrap();

        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_views, 0.0);
        assert!(stats.by_category.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Every page but the last is full, and the pages cover every item once
        #[test]
        fn property_pages_cover_collection(count in 0i64..40, limit in 1u32..15) {
            let blogs = FakeBlogs::new(count, false);
            let first = tokio_test::block_on(paginate(
                &blogs,
                Filter::new(),
                PaginateOptions { page: Some(1), limit: Some(limit), ..Default::default() },
            )).unwrap();

            let mut seen = Vec::new();
            for page in 1..=first.pagination.total_pages.max(1) {
                let result = tokio_test::block_on(paginate(
                    &blogs,
                    Filter::new(),
                    PaginateOptions { page: Some(page), limit: Some(limit), ..Default::default() },
                )).unwrap();
                if result.pagination.has_next_page {
                    prop_assert_eq!(result.len(), limit as usize);
                }
                seen.extend(result.data.into_iter().map(|b| b.id));
            }

            prop_assert_eq!(seen, (1..=count).collect::<Vec<_>>());
        }
    }
}

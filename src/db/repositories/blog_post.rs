//! Blog post repository
//!
//! Tags are stored as a JSON array in the `tags` column and filtered with
//! SQLite's `json_each`.

use crate::db::DynDatabasePool;
use crate::models::{BlogPost, BlogPostFilter, BlogPostStatus, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use super::like_pattern;

/// Blog post repository trait
#[async_trait]
pub trait BlogPostRepository: Send + Sync {
    async fn create(&self, post: &BlogPost) -> Result<BlogPost>;

    /// Lookup by id, soft-deleted posts included
    async fn get_by_id(&self, id: i64) -> Result<Option<BlogPost>>;

    /// Lookup by slug, soft-deleted posts included
    async fn get_by_slug(&self, slug: &str) -> Result<Option<BlogPost>>;

    /// Whether another post already uses the slug
    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Persist every mutable column of the post
    async fn update(&self, post: &BlogPost) -> Result<BlogPost>;

    async fn increment_view_count(&self, id: i64) -> Result<()>;

    async fn count(&self, filter: &BlogPostFilter) -> Result<i64>;

    /// Newest first (by publication, then creation)
    async fn list(
        &self,
        filter: &BlogPostFilter,
        params: &ListParams,
    ) -> Result<(Vec<BlogPost>, i64)>;

    async fn list_all(&self, filter: &BlogPostFilter) -> Result<Vec<BlogPost>>;
}

/// SQLx-based blog post repository implementation
pub struct SqlxBlogPostRepository {
    pool: DynDatabasePool,
}

impl SqlxBlogPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BlogPostRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl BlogPostRepository for SqlxBlogPostRepository {
    async fn create(&self, post: &BlogPost) -> Result<BlogPost> {
        create_post(self.pool.sqlite(), post).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<BlogPost>> {
        let row = sqlx::query(&format!("SELECT {} FROM blog_posts WHERE id = ?", POST_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get blog post by ID")?;
        row.as_ref().map(row_to_post).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<BlogPost>> {
        let row = sqlx::query(&format!("SELECT {} FROM blog_posts WHERE slug = ?", POST_COLUMNS))
            .bind(slug)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get blog post by slug")?;
        row.as_ref().map(row_to_post).transpose()
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM blog_posts WHERE slug = ? AND id != ?",
        )
        .bind(slug)
        .bind(exclude_id.unwrap_or(0))
        .fetch_one(self.pool.sqlite())
        .await
        .context("Failed to check blog post slug")?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn update(&self, post: &BlogPost) -> Result<BlogPost> {
        update_post(self.pool.sqlite(), post).await?;
        self.get_by_id(post.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Blog post not found after update"))
    }

    async fn increment_view_count(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE blog_posts SET view_count = view_count + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to increment view count")?;
        Ok(())
    }

    async fn count(&self, filter: &BlogPostFilter) -> Result<i64> {
        count_posts(self.pool.sqlite(), filter).await
    }

    async fn list(
        &self,
        filter: &BlogPostFilter,
        params: &ListParams,
    ) -> Result<(Vec<BlogPost>, i64)> {
        let pool = self.pool.sqlite();
        let posts = select_posts(pool, filter, Some(params)).await?;
        let total = count_posts(pool, filter).await?;
        Ok((posts, total))
    }

    async fn list_all(&self, filter: &BlogPostFilter) -> Result<Vec<BlogPost>> {
        select_posts(self.pool.sqlite(), filter, None).await
    }
}

const POST_COLUMNS: &str = "id, slug, title, excerpt, content, cover_image, category, tags, author_id, \
     status, published_at, view_count, deleted_at, created_at, updated_at";

async fn create_post(pool: &SqlitePool, post: &BlogPost) -> Result<BlogPost> {
    let now = Utc::now();
    let tags = serde_json::to_string(&post.tags).context("Failed to encode tags")?;

    let result = sqlx::query(
        r#"
        INSERT INTO blog_posts (slug, title, excerpt, content, cover_image, category, tags,
                                author_id, status, published_at, view_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&post.slug)
    .bind(&post.title)
    .bind(&post.excerpt)
    .bind(&post.content)
    .bind(&post.cover_image)
    .bind(&post.category)
    .bind(tags)
    .bind(post.author_id)
    .bind(post.status.to_string())
    .bind(post.published_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create blog post")?;

    Ok(BlogPost {
        id: result.last_insert_rowid(),
        view_count: 0,
        deleted_at: None,
        created_at: now,
        updated_at: now,
        ..post.clone()
    })
}

async fn update_post(pool: &SqlitePool, post: &BlogPost) -> Result<()> {
    let tags = serde_json::to_string(&post.tags).context("Failed to encode tags")?;

    sqlx::query(
        r#"
        UPDATE blog_posts
        SET slug = ?, title = ?, excerpt = ?, content = ?, cover_image = ?, category = ?,
            tags = ?, status = ?, published_at = ?, deleted_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&post.slug)
    .bind(&post.title)
    .bind(&post.excerpt)
    .bind(&post.content)
    .bind(&post.cover_image)
    .bind(&post.category)
    .bind(tags)
    .bind(post.status.to_string())
    .bind(post.published_at)
    .bind(post.deleted_at)
    .bind(Utc::now())
    .bind(post.id)
    .execute(pool)
    .await
    .context("Failed to update blog post")?;

    Ok(())
}

fn push_post_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &BlogPostFilter) {
    qb.push(" WHERE 1 = 1");
    if !filter.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(category) = filter.category.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND LOWER(category) = ")
            .push_bind(category.trim().to_lowercase());
    }
    if let Some(tag) = filter.tag.as_deref().filter(|t| !t.trim().is_empty()) {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(blog_posts.tags) WHERE LOWER(json_each.value) = ")
            .push_bind(tag.trim().to_lowercase())
            .push(")");
    }
    if let Some(pattern) = filter.q.as_deref().and_then(like_pattern) {
        qb.push(" AND (LOWER(title) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(COALESCE(excerpt, '')) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(content) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

async fn count_posts(pool: &SqlitePool, filter: &BlogPostFilter) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM blog_posts");
    push_post_filter(&mut qb, filter);

    let row = qb
        .build()
        .fetch_one(pool)
        .await
        .context("Failed to count blog posts")?;
    Ok(row.try_get("count")?)
}

async fn select_posts(
    pool: &SqlitePool,
    filter: &BlogPostFilter,
    params: Option<&ListParams>,
) -> Result<Vec<BlogPost>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM blog_posts", POST_COLUMNS));
    push_post_filter(&mut qb, filter);
    qb.push(" ORDER BY COALESCE(published_at, created_at) DESC, id DESC");
    if let Some(params) = params {
        qb.push(" LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());
    }

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to list blog posts")?;

    rows.iter().map(row_to_post).collect()
}

fn row_to_post(row: &sqlx::sqlite::SqliteRow) -> Result<BlogPost> {
    let status_str: String = row.try_get("status")?;
    let status = BlogPostStatus::from_str(&status_str)
        .with_context(|| format!("Invalid blog post status in database: {}", status_str))?;

    let tags_json: String = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(BlogPost {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        excerpt: row.try_get("excerpt")?,
        content: row.try_get("content")?,
        cover_image: row.try_get("cover_image")?,
        category: row.try_get("category")?,
        tags,
        author_id: row.try_get("author_id")?,
        status,
        published_at: row.try_get("published_at")?,
        view_count: row.try_get("view_count")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

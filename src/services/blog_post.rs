//! Blog post service
//!
//! Admin-authored posts with a draft/published workflow and soft deletes.
//! Public reads only ever see published, non-deleted posts.

use crate::db::repositories::BlogPostRepository;
use crate::models::{
    BlogPost, BlogPostFilter, BlogPostStatus, CreateBlogPostInput, ListParams, PagedResult,
    UpdateBlogPostInput,
};
use crate::services::export::{write_csv, BlogPostCsvRow};
use crate::services::slug::{fallback_slug, generate_slug, unique_slug};
use crate::services::{apply_text, clean_text, required_text};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_TAGS: usize = 20;

/// Error types for blog post operations
#[derive(Debug, thiserror::Error)]
pub enum BlogPostServiceError {
    #[error("Blog post not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Blog post slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Cannot change post from {from} to {to}")]
    InvalidTransition {
        from: BlogPostStatus,
        to: BlogPostStatus,
    },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct BlogPostService {
    repo: Arc<dyn BlogPostRepository>,
}

impl BlogPostService {
    pub fn new(repo: Arc<dyn BlogPostRepository>) -> Self {
        Self { repo }
    }

    /// Create a post.
    ///
    /// Without an explicit slug one is derived from the title and made unique.
    /// An explicit slug that is already taken is rejected.
    pub async fn create(
        &self,
        input: CreateBlogPostInput,
        author_id: i64,
    ) -> Result<BlogPost, BlogPostServiceError> {
        let title = validate_title(&input.title)?;
        let content =
            required_text(&input.content, "Content").map_err(BlogPostServiceError::ValidationError)?;
        let slug = self.resolve_slug(input.slug.as_deref(), &title, None).await?;

        let now = Utc::now();
        let status = input.status.unwrap_or_default();
        let post = BlogPost {
            id: 0,
            slug,
            title,
            excerpt: clean_text(input.excerpt),
            content,
            cover_image: clean_text(input.cover_image),
            category: clean_text(input.category),
            tags: normalize_tags(input.tags)?,
            author_id,
            status,
            published_at: (status == BlogPostStatus::Published).then_some(now),
            view_count: 0,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .repo
            .create(&post)
            .await
            .context("Failed to create blog post")?;

        tracing::info!(post_id = created.id, slug = %created.slug, %status, "Blog post created");
        Ok(created)
    }

    /// Partial update. Deleted posts cannot be edited.
    pub async fn update(
        &self,
        id: i64,
        input: UpdateBlogPostInput,
    ) -> Result<BlogPost, BlogPostServiceError> {
        let mut post = self.require_live(id).await?;

        if let Some(title) = input.title {
            post.title = validate_title(&title)?;
        }
        if let Some(content) = input.content {
            post.content =
                required_text(&content, "Content").map_err(BlogPostServiceError::ValidationError)?;
        }
        if let Some(slug) = input.slug {
            if slug.trim() != post.slug {
                post.slug = self.resolve_slug(Some(&slug), &post.title, Some(id)).await?;
            }
        }
        apply_text(&mut post.excerpt, input.excerpt);
        apply_text(&mut post.cover_image, input.cover_image);
        apply_text(&mut post.category, input.category);
        if let Some(tags) = input.tags {
            post.tags = normalize_tags(tags)?;
        }
        post.updated_at = Utc::now();

        Ok(self
            .repo
            .update(&post)
            .await
            .context("Failed to update blog post")?)
    }

    /// Draft → Published. `published_at` is set on first publication only.
    pub async fn publish(&self, id: i64) -> Result<BlogPost, BlogPostServiceError> {
        self.transition(id, BlogPostStatus::Published).await
    }

    /// Published → Draft
    pub async fn unpublish(&self, id: i64) -> Result<BlogPost, BlogPostServiceError> {
        self.transition(id, BlogPostStatus::Draft).await
    }

    async fn transition(
        &self,
        id: i64,
        to: BlogPostStatus,
    ) -> Result<BlogPost, BlogPostServiceError> {
        let mut post = self.require_live(id).await?;
        let from = post.status;
        if !from.can_transition_to(to) {
            return Err(BlogPostServiceError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        post.status = to;
        if to == BlogPostStatus::Published && post.published_at.is_none() {
            post.published_at = Some(now);
        }
        post.updated_at = now;

        let updated = self
            .repo
            .update(&post)
            .await
            .context("Failed to change blog post status")?;
        tracing::info!(post_id = id, %from, %to, "Blog post status changed");
        Ok(updated)
    }

    pub async fn soft_delete(&self, id: i64) -> Result<(), BlogPostServiceError> {
        let mut post = self.require_live(id).await?;
        let now = Utc::now();
        post.deleted_at = Some(now);
        post.updated_at = now;
        self.repo
            .update(&post)
            .await
            .context("Failed to delete blog post")?;
        tracing::info!(post_id = id, "Blog post deleted");
        Ok(())
    }

    /// Undo a soft delete. Restoring a live post is a no-op.
    pub async fn restore(&self, id: i64) -> Result<BlogPost, BlogPostServiceError> {
        let mut post = self.require(id).await?;
        if !post.is_deleted() {
            return Ok(post);
        }
        post.deleted_at = None;
        post.updated_at = Utc::now();
        let restored = self
            .repo
            .update(&post)
            .await
            .context("Failed to restore blog post")?;
        tracing::info!(post_id = id, "Blog post restored");
        Ok(restored)
    }

    /// Published, non-deleted posts, newest first
    pub async fn list_public(
        &self,
        filter: BlogPostFilter,
        params: &ListParams,
    ) -> Result<PagedResult<BlogPost>, BlogPostServiceError> {
        let filter = BlogPostFilter {
            status: Some(BlogPostStatus::Published),
            include_deleted: false,
            ..filter
        };
        self.list_admin(&filter, params).await
    }

    pub async fn list_admin(
        &self,
        filter: &BlogPostFilter,
        params: &ListParams,
    ) -> Result<PagedResult<BlogPost>, BlogPostServiceError> {
        let (items, total) = self
            .repo
            .list(filter, params)
            .await
            .context("Failed to list blog posts")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn count(&self, filter: &BlogPostFilter) -> Result<i64, BlogPostServiceError> {
        Ok(self
            .repo
            .count(filter)
            .await
            .context("Failed to count blog posts")?)
    }

    /// Public read by slug; counts a view.
    pub async fn get_public_by_slug(&self, slug: &str) -> Result<BlogPost, BlogPostServiceError> {
        let mut post = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get blog post by slug")?
            .filter(BlogPost::is_public)
            .ok_or_else(|| BlogPostServiceError::NotFound(slug.to_string()))?;

        self.repo
            .increment_view_count(post.id)
            .await
            .context("Failed to count view")?;
        post.view_count += 1;
        Ok(post)
    }

    /// Admin read by id, deleted posts included
    pub async fn get_by_id(&self, id: i64) -> Result<BlogPost, BlogPostServiceError> {
        self.require(id).await
    }

    pub async fn export_csv(&self, filter: &BlogPostFilter) -> Result<Vec<u8>, BlogPostServiceError> {
        let posts = self
            .repo
            .list_all(filter)
            .await
            .context("Failed to load blog posts for export")?;
        let rows: Vec<BlogPostCsvRow> = posts.iter().map(BlogPostCsvRow::from).collect();
        Ok(write_csv(&rows)?)
    }

    async fn require(&self, id: i64) -> Result<BlogPost, BlogPostServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get blog post by ID")?
            .ok_or_else(|| BlogPostServiceError::NotFound(id.to_string()))
    }

    /// Like `require`, but soft-deleted posts count as missing
    async fn require_live(&self, id: i64) -> Result<BlogPost, BlogPostServiceError> {
        let post = self.require(id).await?;
        if post.is_deleted() {
            return Err(BlogPostServiceError::NotFound(id.to_string()));
        }
        Ok(post)
    }

    async fn resolve_slug(
        &self,
        requested: Option<&str>,
        title: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, BlogPostServiceError> {
        if let Some(requested) = requested.filter(|s| !s.trim().is_empty()) {
            let slug = generate_slug(requested);
            if slug.is_empty() {
                return Err(BlogPostServiceError::ValidationError(format!(
                    "Invalid slug: {}",
                    requested
                )));
            }
            if self
                .repo
                .slug_exists(&slug, exclude_id)
                .await
                .context("Failed to check slug")?
            {
                return Err(BlogPostServiceError::DuplicateSlug(slug));
            }
            return Ok(slug);
        }

        let base = match generate_slug(title) {
            s if s.is_empty() => fallback_slug("post"),
            s => s,
        };
        let repo = self.repo.clone();
        Ok(unique_slug(&base, move |candidate| {
            let repo = repo.clone();
            async move { repo.slug_exists(&candidate, exclude_id).await }
        })
        .await?)
    }
}

fn validate_title(title: &str) -> Result<String, BlogPostServiceError> {
    let title = required_text(title, "Title").map_err(BlogPostServiceError::ValidationError)?;
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(BlogPostServiceError::ValidationError(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title)
}

/// Trim, drop blanks and de-duplicate tags case-insensitively, keeping order.
fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>, BlogPostServiceError> {
    let mut seen = std::collections::HashSet::new();
    let tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect();

    if tags.len() > MAX_TAGS {
        return Err(BlogPostServiceError::ValidationError(format!(
            "A post can have at most {} tags",
            MAX_TAGS
        )));
    }
    Ok(tags)
}

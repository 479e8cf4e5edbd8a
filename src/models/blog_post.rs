//! Blog post model
//!
//! This module provides:
//! - `BlogPost` entity
//! - `BlogPostStatus` and its publication workflow
//! - Input and filter types for the blog service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Blog post entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: i64,
    /// URL-friendly slug (unique)
    pub slug: String,
    pub title: String,
    /// Short teaser shown in listings
    pub excerpt: Option<String>,
    pub content: String,
    pub cover_image: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author_id: i64,
    pub status: BlogPostStatus,
    /// Set the first time the post is published
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub view_count: i64,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlogPost {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_published(&self) -> bool {
        self.status == BlogPostStatus::Published
    }

    /// Visible on the public site
    pub fn is_public(&self) -> bool {
        self.is_published() && !self.is_deleted()
    }
}

/// Blog post publication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlogPostStatus {
    /// Not visible to the public
    #[default]
    Draft,
    /// Visible to the public
    Published,
}

impl BlogPostStatus {
    /// Draft and Published toggle; staying in place is not a transition.
    pub fn can_transition_to(self, next: BlogPostStatus) -> bool {
        self != next
    }
}

impl fmt::Display for BlogPostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlogPostStatus::Draft => write!(f, "draft"),
            BlogPostStatus::Published => write!(f, "published"),
        }
    }
}

impl FromStr for BlogPostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(BlogPostStatus::Draft),
            "published" => Ok(BlogPostStatus::Published),
            _ => Err(anyhow::anyhow!("Invalid blog post status: {}", s)),
        }
    }
}

/// Input for creating a blog post
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBlogPostInput {
    pub title: String,
    pub content: String,
    /// Generated from the title when absent
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub cover_image: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Defaults to draft
    pub status: Option<BlogPostStatus>,
}

/// Partial update. An empty string clears an optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBlogPostInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub cover_image: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Filter for post listings and exports
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlogPostFilter {
    pub status: Option<BlogPostStatus>,
    pub category: Option<String>,
    pub tag: Option<String>,
    /// Case-insensitive match on title, excerpt and content
    pub q: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

//! Business directory service
//!
//! Members list their own businesses; admins verify, moderate and restore
//! listings.

use crate::db::repositories::BusinessRepository;
use crate::models::{
    Business, BusinessCategory, BusinessFilter, CreateBusinessInput, ListParams, PagedResult,
    UpdateBusinessInput, User,
};
use crate::services::export::{write_csv, BusinessCsvRow};
use crate::services::slug::{fallback_slug, generate_slug, unique_slug};
use crate::services::{clean_text, required_text};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const MAX_NAME_LENGTH: usize = 120;

/// Error types for business directory operations
#[derive(Debug, thiserror::Error)]
pub enum BusinessServiceError {
    #[error("Business not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Business slug already exists: {0}")]
    DuplicateSlug(String),

    /// Only the owner or an admin may change a listing
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct BusinessService {
    repo: Arc<dyn BusinessRepository>,
}

impl BusinessService {
    pub fn new(repo: Arc<dyn BusinessRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(
        &self,
        input: CreateBusinessInput,
        owner_id: i64,
    ) -> Result<Business, BusinessServiceError> {
        let name = validate_name(&input.name)?;
        let description = required_text(&input.description, "Description")
            .map_err(BusinessServiceError::ValidationError)?;
        let category = required_text(&input.category, "Category")
            .map_err(BusinessServiceError::ValidationError)?;
        let slug = self.resolve_slug(input.slug.as_deref(), &name, None).await?;

        let now = Utc::now();
        let business = Business {
            id: 0,
            slug,
            name,
            description,
            category,
            owner_id,
            email: normalize_contact_email(input.email)?,
            phone: clean_text(input.phone),
            website: normalize_website(input.website),
            instagram: normalize_instagram(input.instagram),
            address: clean_text(input.address),
            city: clean_text(input.city),
            logo_url: clean_text(input.logo_url),
            is_verified: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .repo
            .create(&business)
            .await
            .context("Failed to create business")?;
        tracing::info!(business_id = created.id, owner_id, "Business listed");
        Ok(created)
    }

    /// Partial update by the owner or an admin
    pub async fn update(
        &self,
        id: i64,
        input: UpdateBusinessInput,
        actor: &User,
    ) -> Result<Business, BusinessServiceError> {
        let mut business = self.require_managed(id, actor).await?;

        if let Some(name) = input.name {
            business.name = validate_name(&name)?;
        }
        if let Some(description) = input.description {
            business.description = required_text(&description, "Description")
                .map_err(BusinessServiceError::ValidationError)?;
        }
        if let Some(category) = input.category {
            business.category = required_text(&category, "Category")
                .map_err(BusinessServiceError::ValidationError)?;
        }
        if let Some(slug) = input.slug {
            if slug.trim() != business.slug {
                business.slug = self
                    .resolve_slug(Some(&slug), &business.name, Some(id))
                    .await?;
            }
        }
        if input.email.is_some() {
            business.email = normalize_contact_email(input.email)?;
        }
        if input.website.is_some() {
            business.website = normalize_website(input.website);
        }
        if input.instagram.is_some() {
            business.instagram = normalize_instagram(input.instagram);
        }
        if input.phone.is_some() {
            business.phone = clean_text(input.phone);
        }
        if input.address.is_some() {
            business.address = clean_text(input.address);
        }
        if input.city.is_some() {
            business.city = clean_text(input.city);
        }
        if input.logo_url.is_some() {
            business.logo_url = clean_text(input.logo_url);
        }

        Ok(self
            .repo
            .update(&business)
            .await
            .context("Failed to update business")?)
    }

    pub async fn soft_delete(&self, id: i64, actor: &User) -> Result<(), BusinessServiceError> {
        let mut business = self.require_managed(id, actor).await?;
        business.deleted_at = Some(Utc::now());
        self.repo
            .update(&business)
            .await
            .context("Failed to delete business")?;
        tracing::info!(business_id = id, actor_id = actor.id, "Business deleted");
        Ok(())
    }

    /// Undo a soft delete (admin). Restoring a live listing is a no-op.
    pub async fn restore(&self, id: i64) -> Result<Business, BusinessServiceError> {
        let mut business = self.require(id).await?;
        if !business.is_deleted() {
            return Ok(business);
        }
        business.deleted_at = None;
        let restored = self
            .repo
            .update(&business)
            .await
            .context("Failed to restore business")?;
        tracing::info!(business_id = id, "Business restored");
        Ok(restored)
    }

    pub async fn set_verified(
        &self,
        id: i64,
        verified: bool,
    ) -> Result<Business, BusinessServiceError> {
        let mut business = self.require(id).await?;
        business.is_verified = verified;
        let updated = self
            .repo
            .update(&business)
            .await
            .context("Failed to update verification")?;
        tracing::info!(business_id = id, verified, "Business verification changed");
        Ok(updated)
    }

    /// Live listings, verified first, then by name
    pub async fn list_public(
        &self,
        filter: BusinessFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Business>, BusinessServiceError> {
        let filter = BusinessFilter {
            include_deleted: false,
            owner_id: None,
            ..filter
        };
        self.list_admin(&filter, params).await
    }

    pub async fn list_admin(
        &self,
        filter: &BusinessFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Business>, BusinessServiceError> {
        let (items, total) = self
            .repo
            .list(filter, params)
            .await
            .context("Failed to list businesses")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// The owner's live listings
    pub async fn list_for_owner(&self, owner_id: i64) -> Result<Vec<Business>, BusinessServiceError> {
        let filter = BusinessFilter {
            owner_id: Some(owner_id),
            ..Default::default()
        };
        Ok(self
            .repo
            .list_all(&filter)
            .await
            .context("Failed to list owner businesses")?)
    }

    pub async fn categories(&self) -> Result<Vec<BusinessCategory>, BusinessServiceError> {
        Ok(self
            .repo
            .categories()
            .await
            .context("Failed to list business categories")?)
    }

    pub async fn count(&self, filter: &BusinessFilter) -> Result<i64, BusinessServiceError> {
        Ok(self
            .repo
            .count(filter)
            .await
            .context("Failed to count businesses")?)
    }

    pub async fn get_public_by_slug(&self, slug: &str) -> Result<Business, BusinessServiceError> {
        self.repo
            .get_by_slug(slug)
            .await
            .context("Failed to get business by slug")?
            .filter(|b| !b.is_deleted())
            .ok_or_else(|| BusinessServiceError::NotFound(slug.to_string()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Business, BusinessServiceError> {
        self.require(id).await
    }

    pub async fn export_csv(&self, filter: &BusinessFilter) -> Result<Vec<u8>, BusinessServiceError> {
        let businesses = self
            .repo
            .list_all(filter)
            .await
            .context("Failed to load businesses for export")?;
        let rows: Vec<BusinessCsvRow> = businesses.iter().map(BusinessCsvRow::from).collect();
        Ok(write_csv(&rows)?)
    }

    async fn require(&self, id: i64) -> Result<Business, BusinessServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get business by ID")?
            .ok_or_else(|| BusinessServiceError::NotFound(id.to_string()))
    }

    /// Live listing the actor is allowed to change
    async fn require_managed(&self, id: i64, actor: &User) -> Result<Business, BusinessServiceError> {
        let business = self.require(id).await?;
        if business.is_deleted() {
            return Err(BusinessServiceError::NotFound(id.to_string()));
        }
        if !actor.can_manage(business.owner_id) {
            tracing::warn!(business_id = id, actor_id = actor.id, "Rejected business change by non-owner");
            return Err(BusinessServiceError::Forbidden(
                "Only the owner can change this listing".to_string(),
            ));
        }
        Ok(business)
    }

    async fn resolve_slug(
        &self,
        requested: Option<&str>,
        name: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, BusinessServiceError> {
        if let Some(requested) = requested.filter(|s| !s.trim().is_empty()) {
            let slug = generate_slug(requested);
            if slug.is_empty() {
                return Err(BusinessServiceError::ValidationError(format!(
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
                return Err(BusinessServiceError::DuplicateSlug(slug));
            }
            return Ok(slug);
        }

        let base = match generate_slug(name) {
            s if s.is_empty() => fallback_slug("business"),
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

fn validate_name(name: &str) -> Result<String, BusinessServiceError> {
    let name = required_text(name, "Name").map_err(BusinessServiceError::ValidationError)?;
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(BusinessServiceError::ValidationError(format!(
            "Name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name)
}

fn normalize_contact_email(email: Option<String>) -> Result<Option<String>, BusinessServiceError> {
    match clean_text(email) {
        Some(email) if !email.contains('@') => Err(BusinessServiceError::ValidationError(format!(
            "Invalid email address: {}",
            email
        ))),
        other => Ok(other.map(|e| e.to_lowercase())),
    }
}

/// Add `https://` to a website without a scheme
pub fn normalize_website(website: Option<String>) -> Option<String> {
    clean_text(website).map(|url| {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            url
        } else {
            format!("https://{}", url)
        }
    })
}

/// Reduce an Instagram profile URL or `@handle` to the bare handle
pub fn normalize_instagram(instagram: Option<String>) -> Option<String> {
    clean_text(instagram).and_then(|value| {
        let handle = value
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_start_matches('@')
            .to_string();
        (!handle.is_empty()).then_some(handle)
    })
}

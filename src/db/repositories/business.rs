//! Business directory repository

use crate::db::DynDatabasePool;
use crate::models::{Business, BusinessCategory, BusinessFilter, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;

use super::like_pattern;

/// Business repository trait
#[async_trait]
pub trait BusinessRepository: Send + Sync {
    async fn create(&self, business: &Business) -> Result<Business>;

    /// Lookup by id, soft-deleted listings included
    async fn get_by_id(&self, id: i64) -> Result<Option<Business>>;

    /// Lookup by slug, soft-deleted listings included
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Business>>;

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    async fn update(&self, business: &Business) -> Result<Business>;

    async fn count(&self, filter: &BusinessFilter) -> Result<i64>;

    /// Verified listings first, then by name
    async fn list(
        &self,
        filter: &BusinessFilter,
        params: &ListParams,
    ) -> Result<(Vec<Business>, i64)>;

    async fn list_all(&self, filter: &BusinessFilter) -> Result<Vec<Business>>;

    /// Categories of live listings with their counts, most used first
    async fn categories(&self) -> Result<Vec<BusinessCategory>>;
}

/// SQLx-based business repository implementation
pub struct SqlxBusinessRepository {
    pool: DynDatabasePool,
}

impl SqlxBusinessRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BusinessRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl BusinessRepository for SqlxBusinessRepository {
    async fn create(&self, business: &Business) -> Result<Business> {
        create_business(self.pool.sqlite(), business).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Business>> {
        let row = sqlx::query(&format!("SELECT {} FROM businesses WHERE id = ?", BUSINESS_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get business by ID")?;
        row.as_ref().map(row_to_business).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Business>> {
        let row = sqlx::query(&format!("SELECT {} FROM businesses WHERE slug = ?", BUSINESS_COLUMNS))
            .bind(slug)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get business by slug")?;
        row.as_ref().map(row_to_business).transpose()
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM businesses WHERE slug = ? AND id != ?")
            .bind(slug)
            .bind(exclude_id.unwrap_or(0))
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to check business slug")?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn update(&self, business: &Business) -> Result<Business> {
        update_business(self.pool.sqlite(), business).await?;
        self.get_by_id(business.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Business not found after update"))
    }

    async fn count(&self, filter: &BusinessFilter) -> Result<i64> {
        count_businesses(self.pool.sqlite(), filter).await
    }

    async fn list(
        &self,
        filter: &BusinessFilter,
        params: &ListParams,
    ) -> Result<(Vec<Business>, i64)> {
        let pool = self.pool.sqlite();
        let items = select_businesses(pool, filter, Some(params)).await?;
        let total = count_businesses(pool, filter).await?;
        Ok((items, total))
    }

    async fn list_all(&self, filter: &BusinessFilter) -> Result<Vec<Business>> {
        select_businesses(self.pool.sqlite(), filter, None).await
    }

    async fn categories(&self) -> Result<Vec<BusinessCategory>> {
        let rows = sqlx::query(
            r#"
            SELECT MIN(category) AS category, COUNT(*) AS count
            FROM businesses
            WHERE deleted_at IS NULL
            GROUP BY LOWER(category)
            ORDER BY count DESC, LOWER(category) ASC
            "#,
        )
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list business categories")?;

        let mut categories = Vec::with_capacity(rows.len());
        for row in rows {
            categories.push(BusinessCategory {
                category: row.try_get("category")?,
                count: row.try_get("count")?,
            });
        }
        Ok(categories)
    }
}

const BUSINESS_COLUMNS: &str = "id, slug, name, description, category, owner_id, email, phone, website, \
     instagram, address, city, logo_url, is_verified, deleted_at, created_at, updated_at";

async fn create_business(pool: &SqlitePool, business: &Business) -> Result<Business> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO businesses (slug, name, description, category, owner_id, email, phone, website,
                                instagram, address, city, logo_url, is_verified, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&business.slug)
    .bind(&business.name)
    .bind(&business.description)
    .bind(&business.category)
    .bind(business.owner_id)
    .bind(&business.email)
    .bind(&business.phone)
    .bind(&business.website)
    .bind(&business.instagram)
    .bind(&business.address)
    .bind(&business.city)
    .bind(&business.logo_url)
    .bind(business.is_verified)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create business")?;

    Ok(Business {
        id: result.last_insert_rowid(),
        deleted_at: None,
        created_at: now,
        updated_at: now,
        ..business.clone()
    })
}

async fn update_business(pool: &SqlitePool, business: &Business) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE businesses
        SET slug = ?, name = ?, description = ?, category = ?, email = ?, phone = ?, website = ?,
            instagram = ?, address = ?, city = ?, logo_url = ?, is_verified = ?, deleted_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&business.slug)
    .bind(&business.name)
    .bind(&business.description)
    .bind(&business.category)
    .bind(&business.email)
    .bind(&business.phone)
    .bind(&business.website)
    .bind(&business.instagram)
    .bind(&business.address)
    .bind(&business.city)
    .bind(&business.logo_url)
    .bind(business.is_verified)
    .bind(business.deleted_at)
    .bind(Utc::now())
    .bind(business.id)
    .execute(pool)
    .await
    .context("Failed to update business")?;

    Ok(())
}

fn push_business_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &BusinessFilter) {
    qb.push(" WHERE 1 = 1");
    if !filter.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if let Some(owner_id) = filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(verified) = filter.verified {
        qb.push(" AND is_verified = ").push_bind(verified);
    }
    if let Some(category) = filter.category.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND LOWER(category) = ")
            .push_bind(category.trim().to_lowercase());
    }
    if let Some(city) = filter.city.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND LOWER(city) = ")
            .push_bind(city.trim().to_lowercase());
    }
    if let Some(pattern) = filter.q.as_deref().and_then(like_pattern) {
        qb.push(" AND (LOWER(name) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(description) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

async fn count_businesses(pool: &SqlitePool, filter: &BusinessFilter) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM businesses");
    push_business_filter(&mut qb, filter);

    let row = qb
        .build()
        .fetch_one(pool)
        .await
        .context("Failed to count businesses")?;
    Ok(row.try_get("count")?)
}

async fn select_businesses(
    pool: &SqlitePool,
    filter: &BusinessFilter,
    params: Option<&ListParams>,
) -> Result<Vec<Business>> {
    let mut qb =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM businesses", BUSINESS_COLUMNS));
    push_business_filter(&mut qb, filter);
    qb.push(" ORDER BY is_verified DESC, name COLLATE NOCASE ASC, id ASC");
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
        .context("Failed to list businesses")?;

    rows.iter().map(row_to_business).collect()
}

fn row_to_business(row: &sqlx::sqlite::SqliteRow) -> Result<Business> {
    Ok(Business {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        owner_id: row.try_get("owner_id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        website: row.try_get("website")?,
        instagram: row.try_get("instagram")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        logo_url: row.try_get("logo_url")?,
        is_verified: row.try_get("is_verified")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxUserRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};

    async fn setup() -> (Arc<dyn BusinessRepository>, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let owner = SqlxUserRepository::boxed(pool.clone())
            .create(&User::new("owner@example.com", "Owner".to_string(), None, UserRole::Member))
            .await
            .unwrap();
        (SqlxBusinessRepository::boxed(pool), owner.id)
    }

    fn business(slug: &str, name: &str, category: &str, owner_id: i64, verified: bool) -> Business {
        let now = Utc::now();
        Business {
            id: 0,
            slug: slug.to_string(),
            name: name.to_string(),
            description: format!("{} description", name),
            category: category.to_string(),
            owner_id,
            email: None,
            phone: None,
            website: None,
            instagram: None,
            address: None,
            city: Some("Madrid".to_string()),
            logo_url: None,
            is_verified: verified,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_verified_first_then_name() {
        let (repo, owner_id) = setup().await;
        repo.create(&business("alfa", "Alfa", "Belleza", owner_id, false)).await.unwrap();
        repo.create(&business("zeta", "Zeta", "Belleza", owner_id, true)).await.unwrap();
        repo.create(&business("beta", "beta", "Comida", owner_id, false)).await.unwrap();

        let (items, total) = repo
            .list(&BusinessFilter::default(), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(total, 3);
        let names: Vec<_> = items.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alfa", "beta"]);
    }

    #[tokio::test]
    async fn test_categories_ignore_case() {
        let (repo, owner_id) = setup().await;
        repo.create(&business("a", "Café Ana", "Comida", owner_id, false)).await.unwrap();
        repo.create(&business("b", "Tacos Bea", "comida", owner_id, false)).await.unwrap();
        repo.create(&business("c", "Peluquería Carla", "Belleza", owner_id, false)).await.unwrap();

        let categories = repo.categories().await.unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category, "Comida");
        assert_eq!(categories[0].count, 2);
        assert_eq!(categories[1].category, "Belleza");
    }

    #[tokio::test]
    async fn test_search_with_non_ascii_capitals() {
        let (repo, owner_id) = setup().await;
        repo.create(&business("a", "CAFÉ LUNA", "Comida", owner_id, false)).await.unwrap();

        let search = BusinessFilter {
            q: Some("Café LUNA".to_uppercase()),
            ..Default::default()
        };
        assert_eq!(repo.count(&search).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filters_and_categories() {
        let (repo, owner_id) = setup().await;
        repo.create(&business("a", "Peluquería Ana", "Belleza", owner_id, true)).await.unwrap();
        repo.create(&business("b", "Uñas Bea", "Belleza", owner_id, false)).await.unwrap();
        let c = repo
            .create(&business("c", "Tacos Carla", "Comida", owner_id, false))
            .await
            .unwrap();

        let verified = BusinessFilter {
            verified: Some(true),
            ..Default::default()
        };
        assert_eq!(repo.count(&verified).await.unwrap(), 1);

        let by_category = BusinessFilter {
            category: Some("belleza".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.count(&by_category).await.unwrap(), 2);

        let mine = BusinessFilter {
            owner_id: Some(owner_id),
            q: Some("tacos".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.list_all(&mine).await.unwrap().len(), 1);

        let mut deleted = c.clone();
        deleted.deleted_at = Some(Utc::now());
        repo.update(&deleted).await.unwrap();

        let categories = repo.categories().await.unwrap();
        assert_eq!(
            categories,
            vec![BusinessCategory {
                category: "Belleza".to_string(),
                count: 2
            }]
        );
    }
}

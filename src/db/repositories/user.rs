//! User repository
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait on SQLite

use crate::db::DynDatabasePool;
use crate::models::{ListParams, User, UserFilter, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use super::like_pattern;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user, returning it with its id
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Lookup by (already normalised) e-mail
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn get_by_google_id(&self, google_id: &str) -> Result<Option<User>>;

    /// Persist every mutable column of the user
    async fn update(&self, user: &User) -> Result<User>;

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Invalidate all previously issued tokens; returns the new version
    async fn increment_token_version(&self, id: i64) -> Result<i64>;

    /// Count users matching the filter
    async fn count(&self, filter: &UserFilter) -> Result<i64>;

    /// List users, newest first
    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)>;

    /// Every user matching the filter, for exports
    async fn list_all(&self, filter: &UserFilter) -> Result<Vec<User>>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        create_user(self.pool.sqlite(), user).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        get_user_by(self.pool.sqlite(), "id", UserKey::Id(id)).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        get_user_by(self.pool.sqlite(), "email", UserKey::Text(email)).await
    }

    async fn get_by_google_id(&self, google_id: &str) -> Result<Option<User>> {
        get_user_by(self.pool.sqlite(), "google_id", UserKey::Text(google_id)).await
    }

    async fn update(&self, user: &User) -> Result<User> {
        update_user(self.pool.sqlite(), user).await
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to record login")?;
        Ok(())
    }

    async fn increment_token_version(&self, id: i64) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE users SET token_version = token_version + 1, updated_at = ? WHERE id = ? RETURNING token_version",
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_one(self.pool.sqlite())
        .await
        .context("Failed to increment token version")?;
        Ok(row.try_get("token_version")?)
    }

    async fn count(&self, filter: &UserFilter) -> Result<i64> {
        count_users(self.pool.sqlite(), filter).await
    }

    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let pool = self.pool.sqlite();
        let users = select_users(pool, filter, Some(params)).await?;
        let total = count_users(pool, filter).await?;
        Ok((users, total))
    }

    async fn list_all(&self, filter: &UserFilter) -> Result<Vec<User>> {
        select_users(self.pool.sqlite(), filter, None).await
    }
}

const USER_COLUMNS: &str = "id, email, name, google_id, password_hash, avatar_url, bio, role, status, \
     token_version, last_login_at, created_at, updated_at";

enum UserKey<'a> {
    Id(i64),
    Text(&'a str),
}

async fn create_user(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (email, name, google_id, password_hash, avatar_url, bio, role, status,
                           token_version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.email)
    .bind(&user.name)
    .bind(&user.google_id)
    .bind(&user.password_hash)
    .bind(&user.avatar_url)
    .bind(&user.bio)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(user.token_version)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..user.clone()
    })
}

async fn get_user_by(pool: &SqlitePool, column: &str, key: UserKey<'_>) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
    let query = sqlx::query(&sql);
    let query = match key {
        UserKey::Id(id) => query.bind(id),
        UserKey::Text(text) => query.bind(text),
    };

    let row = query
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {}", column))?;

    row.as_ref().map(row_to_user).transpose()
}

async fn update_user(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, name = ?, google_id = ?, password_hash = ?, avatar_url = ?, bio = ?,
            role = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.email)
    .bind(&user.name)
    .bind(&user.google_id)
    .bind(&user.password_hash)
    .bind(&user.avatar_url)
    .bind(&user.bio)
    .bind(user.role.to_string())
    .bind(user.status.to_string())
    .bind(now)
    .bind(user.id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    get_user_by(pool, "id", UserKey::Id(user.id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found after update"))
}

fn push_user_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a UserFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role.to_string());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(pattern) = filter.q.as_deref().and_then(like_pattern) {
        qb.push(" AND (LOWER(name) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR email LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

async fn count_users(pool: &SqlitePool, filter: &UserFilter) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM users");
    push_user_filter(&mut qb, filter);

    let row = qb
        .build()
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;
    Ok(row.try_get("count")?)
}

async fn select_users(
    pool: &SqlitePool,
    filter: &UserFilter,
    params: Option<&ListParams>,
) -> Result<Vec<User>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users", USER_COLUMNS));
    push_user_filter(&mut qb, filter);
    qb.push(" ORDER BY created_at DESC, id DESC");
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
        .context("Failed to list users")?;

    rows.iter().map(row_to_user).collect()
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role_str: String = row.try_get("role")?;
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;

    let status_str: String = row.try_get("status")?;
    let status = UserStatus::from_str(&status_str)
        .with_context(|| format!("Invalid status in database: {}", status_str))?;

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        google_id: row.try_get("google_id")?,
        password_hash: row.try_get("password_hash")?,
        avatar_url: row.try_get("avatar_url")?,
        bio: row.try_get("bio")?,
        role,
        status,
        token_version: row.try_get("token_version")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

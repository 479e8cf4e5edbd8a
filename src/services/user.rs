//! User service
//!
//! Member sign-up and login, administrator login, Google sign-in, token
//! authentication and revocation, profile management, and the admin-side user
//! moderation operations.

use crate::db::repositories::{is_unique_violation, UserRepository};
use crate::models::{
    normalize_email, ChangePasswordInput, ListParams, LoginInput, PagedResult, RegisterInput,
    UpdateProfileInput, User, UserFilter, UserRole, UserStatus,
};
use crate::services::export::{write_csv, UserCsvRow};
use crate::services::oauth::OAuthProfile;
use crate::services::{apply_text, clean_text};
use crate::services::password::{hash_password, is_acceptable_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::services::token::{Claims, IssuedToken, TokenError, TokenScope, TokenService};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Invalid credentials or token
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Account suspended")]
    Suspended,

    #[error("Token has expired")]
    TokenExpired,

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<TokenError> for UserServiceError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => UserServiceError::TokenExpired,
            TokenError::Invalid => UserServiceError::AuthenticationError("Invalid token".to_string()),
            TokenError::Signing(msg) => UserServiceError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

/// User service for accounts and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    tokens: Arc<TokenService>,
}

impl UserService {
    pub fn new(user_repo: Arc<dyn UserRepository>, tokens: Arc<TokenService>) -> Self {
        Self { user_repo, tokens }
    }

    /// Register a new member with e-mail and password, signing them in.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for a blank name, malformed e-mail or short password
    /// - `UserExists` if the e-mail is already registered
    pub async fn register(
        &self,
        input: RegisterInput,
    ) -> Result<(User, IssuedToken), UserServiceError> {
        let name = validate_name(&input.name)?;
        let email = validate_email(&input.email)?;
        validate_new_password(&input.password)?;

        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(email_taken(&email));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let user = User::new(&email, name, Some(password_hash), UserRole::Member);
        // A concurrent sign-up can win between the lookup and the insert.
        let created = match self.user_repo.create(&user).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => return Err(email_taken(&email)),
            Err(e) => return Err(e.context("Failed to create user").into()),
        };

        tracing::info!(user_id = created.id, "Member registered");

        let token = self.tokens.issue(&created, TokenScope::User)?;
        Ok((created, token))
    }

    /// E-mail/password login.
    ///
    /// Unknown e-mail, wrong password, and (for the admin scope) a non-admin
    /// account all produce the same `AuthenticationError`.
    pub async fn login(
        &self,
        input: LoginInput,
        scope: TokenScope,
    ) -> Result<(User, IssuedToken), UserServiceError> {
        let email = normalize_email(&input.email);

        let user = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| UserServiceError::AuthenticationError(INVALID_CREDENTIALS.to_string()))?;

        let password_valid = match user.password_hash.as_deref() {
            Some(hash) => verify_password(&input.password, hash).context("Failed to verify password")?,
            None => false,
        };

        if !password_valid || (scope == TokenScope::Admin && !user.is_admin()) {
            tracing::warn!(user_id = user.id, %scope, "Login rejected");
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        }

        if user.is_suspended() {
            tracing::warn!(user_id = user.id, "Suspended user attempted to log in");
            return Err(UserServiceError::Suspended);
        }

        self.complete_login(user, scope).await
    }

    /// Sign in with a Google profile.
    ///
    /// The account is found by Google id, else linked by e-mail, else created.
    pub async fn login_with_google(
        &self,
        profile: OAuthProfile,
    ) -> Result<(User, IssuedToken), UserServiceError> {
        if !profile.email_verified {
            return Err(UserServiceError::AuthenticationError(
                "Google account e-mail is not verified".to_string(),
            ));
        }
        let email = validate_email(&profile.email)?;

        let existing = match self
            .user_repo
            .get_by_google_id(&profile.provider_id)
            .await
            .context("Failed to look up Google account")?
        {
            Some(user) => Some(user),
            None => self
                .user_repo
                .get_by_email(&email)
                .await
                .context("Failed to look up user")?,
        };

        let user = match existing {
            Some(mut user) => {
                if user.google_id.as_deref() != Some(profile.provider_id.as_str()) {
                    tracing::info!(user_id = user.id, "Linking Google account to existing user");
                    user.google_id = Some(profile.provider_id.clone());
                    if user.avatar_url.is_none() {
                        user.avatar_url = profile.avatar_url.clone();
                    }
                    user = self
                        .user_repo
                        .update(&user)
                        .await
                        .context("Failed to link Google account")?;
                }
                user
            }
            None => {
                let name = profile
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| email.split('@').next().unwrap_or("Amiga").to_string());
                let mut user = User::new(&email, name, None, UserRole::Member);
                user.google_id = Some(profile.provider_id.clone());
                user.avatar_url = profile.avatar_url.clone();
                let created = self
                    .user_repo
                    .create(&user)
                    .await
                    .context("Failed to create user")?;
                tracing::info!(user_id = created.id, "Member registered with Google");
                created
            }
        };

        if user.is_suspended() {
            return Err(UserServiceError::Suspended);
        }

        self.complete_login(user, TokenScope::User).await
    }

    async fn complete_login(
        &self,
        mut user: User,
        scope: TokenScope,
    ) -> Result<(User, IssuedToken), UserServiceError> {
        let now = Utc::now();
        self.user_repo
            .record_login(user.id, now)
            .await
            .context("Failed to record login")?;
        user.last_login_at = Some(now);

        let token = self.tokens.issue(&user, scope)?;
        tracing::info!(user_id = user.id, %scope, "User logged in");
        Ok((user, token))
    }

    /// Resolve a bearer token to its user.
    ///
    /// Rejects unknown users, suspended users and revoked tokens.
    pub async fn authenticate(&self, token: &str) -> Result<(User, Claims), UserServiceError> {
        let claims = self.tokens.verify(token)?;

        let user = self
            .user_repo
            .get_by_id(claims.sub)
            .await
            .context("Failed to load user")?
            .ok_or_else(|| UserServiceError::AuthenticationError("Unknown user".to_string()))?;

        if user.token_version != claims.ver {
            return Err(UserServiceError::AuthenticationError(
                "Token has been revoked".to_string(),
            ));
        }
        if user.is_suspended() {
            return Err(UserServiceError::Suspended);
        }

        Ok((user, claims))
    }

    /// Revoke every token issued to the user so far
    pub async fn logout_everywhere(&self, user_id: i64) -> Result<(), UserServiceError> {
        let version = self
            .user_repo
            .increment_token_version(user_id)
            .await
            .context("Failed to revoke tokens")?;
        tracing::info!(user_id, version, "Revoked all tokens");
        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self.require(user_id).await?;

        if let Some(name) = input.name {
            user.name = validate_name(&name)?;
        }
        apply_text(&mut user.avatar_url, input.avatar_url);
        if let Some(bio) = input.bio {
            let bio = clean_text(Some(bio));
            if bio.as_ref().is_some_and(|b| b.chars().count() > 500) {
                return Err(UserServiceError::ValidationError(
                    "Bio must be at most 500 characters".to_string(),
                ));
            }
            user.bio = bio;
        }

        Ok(self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update profile")?)
    }

    /// Set a new password and revoke older tokens; returns a fresh token for
    /// the caller's scope.
    ///
    /// Accounts that already have a password must confirm it.
    pub async fn change_password(
        &self,
        user_id: i64,
        input: ChangePasswordInput,
        scope: TokenScope,
    ) -> Result<IssuedToken, UserServiceError> {
        let mut user = self.require(user_id).await?;

        if let Some(hash) = user.password_hash.as_deref() {
            let current = input.current_password.as_deref().unwrap_or_default();
            if !verify_password(current, hash).context("Failed to verify password")? {
                return Err(UserServiceError::AuthenticationError(
                    "Current password is incorrect".to_string(),
                ));
            }
        }
        validate_new_password(&input.new_password)?;

        user.password_hash =
            Some(hash_password(&input.new_password).context("Failed to hash password")?);
        self.user_repo
            .update(&user)
            .await
            .context("Failed to update password")?;
        user.token_version = self
            .user_repo
            .increment_token_version(user.id)
            .await
            .context("Failed to revoke tokens")?;

        tracing::info!(user_id, "Password changed");
        Ok(self.tokens.issue(&user, scope)?)
    }

    pub async fn list(
        &self,
        filter: &UserFilter,
        params: &ListParams,
    ) -> Result<PagedResult<User>, UserServiceError> {
        let (users, total) = self
            .user_repo
            .list(filter, params)
            .await
            .context("Failed to list users")?;
        Ok(PagedResult::new(users, total, params))
    }

    pub async fn list_all(&self, filter: &UserFilter) -> Result<Vec<User>, UserServiceError> {
        Ok(self
            .user_repo
            .list_all(filter)
            .await
            .context("Failed to list users")?)
    }

    pub async fn count(&self, filter: &UserFilter) -> Result<i64, UserServiceError> {
        Ok(self
            .user_repo
            .count(filter)
            .await
            .context("Failed to count users")?)
    }

    pub async fn export_csv(&self, filter: &UserFilter) -> Result<Vec<u8>, UserServiceError> {
        let users = self.list_all(filter).await?;
        let rows: Vec<UserCsvRow> = users.iter().map(UserCsvRow::from).collect();
        Ok(write_csv(&rows)?)
    }

    /// Change a user's role. Admins cannot demote themselves.
    pub async fn set_role(
        &self,
        actor: &User,
        user_id: i64,
        role: UserRole,
    ) -> Result<User, UserServiceError> {
        if actor.id == user_id && role != UserRole::Admin {
            return Err(UserServiceError::Forbidden(
                "You cannot remove your own admin role".to_string(),
            ));
        }

        let mut user = self.require(user_id).await?;
        user.role = role;
        let updated = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update role")?;

        tracing::info!(actor_id = actor.id, user_id, %role, "User role changed");
        Ok(updated)
    }

    /// Suspend or reactivate a user. Admins cannot suspend themselves.
    pub async fn set_status(
        &self,
        actor: &User,
        user_id: i64,
        status: UserStatus,
    ) -> Result<User, UserServiceError> {
        if actor.id == user_id && status == UserStatus::Suspended {
            return Err(UserServiceError::Forbidden(
                "You cannot suspend your own account".to_string(),
            ));
        }

        let mut user = self.require(user_id).await?;
        user.status = status;
        let updated = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update status")?;

        tracing::info!(actor_id = actor.id, user_id, %status, "User status changed");
        Ok(updated)
    }

    /// Make sure an administrator account exists for `email`.
    ///
    /// Creates it, or promotes and reactivates an existing account. An existing
    /// password is kept.
    pub async fn ensure_admin(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<User, UserServiceError> {
        let email = validate_email(email)?;
        validate_new_password(password)?;

        match self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up admin")?
        {
            Some(mut user) => {
                if user.is_admin() && !user.is_suspended() && user.has_password() {
                    return Ok(user);
                }
                user.role = UserRole::Admin;
                user.status = UserStatus::Active;
                if user.password_hash.is_none() {
                    user.password_hash =
                        Some(hash_password(password).context("Failed to hash password")?);
                }
                let updated = self
                    .user_repo
                    .update(&user)
                    .await
                    .context("Failed to promote admin")?;
                tracing::info!(user_id = updated.id, "Promoted bootstrap administrator");
                Ok(updated)
            }
            None => {
                let hash = hash_password(password).context("Failed to hash password")?;
                let user = User::new(&email, validate_name(name)?, Some(hash), UserRole::Admin);
                let created = self
                    .user_repo
                    .create(&user)
                    .await
                    .context("Failed to create admin")?;
                tracing::info!(user_id = created.id, "Created bootstrap administrator");
                Ok(created)
            }
        }
    }

    async fn require(&self, user_id: i64) -> Result<User, UserServiceError> {
        self.user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user by ID")?
            .ok_or_else(|| UserServiceError::NotFound(format!("User {} not found", user_id)))
    }
}

fn validate_name(name: &str) -> Result<String, UserServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UserServiceError::ValidationError(
            "Name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > 100 {
        return Err(UserServiceError::ValidationError(
            "Name must be at most 100 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Normalise and sanity-check an e-mail address
pub fn validate_email(email: &str) -> Result<String, UserServiceError> {
    let email = normalize_email(email);
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(UserServiceError::ValidationError(format!(
            "Invalid email address: {}",
            email
        )));
    }
    Ok(email)
}

fn email_taken(email: &str) -> UserServiceError {
    UserServiceError::UserExists(format!("Email '{}' is already registered", email))
}

fn validate_new_password(password: &str) -> Result<(), UserServiceError> {
    if !is_acceptable_password(password) {
        return Err(UserServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

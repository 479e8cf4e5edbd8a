//! User model
//!
//! Members sign in with Google or e-mail/password. Administrators are users
//! with the `admin` role who signed in through the admin login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered community member or administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// E-mail address (unique, stored lowercased)
    pub email: String,
    /// Display name
    pub name: String,
    /// Google account subject, once linked
    #[serde(skip_serializing)]
    pub google_id: Option<String>,
    /// Argon2 hash, absent for Google-only accounts
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    /// Bumped to revoke every token issued so far
    #[serde(skip_serializing, default)]
    pub token_version: i64,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new, not yet persisted user.
    ///
    /// The password must already be hashed, see `services::password::hash_password`.
    pub fn new(email: &str, name: String, password_hash: Option<String>, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            email: normalize_email(email),
            name,
            google_id: None,
            password_hash,
            avatar_url: None,
            bio: None,
            role,
            status: UserStatus::Active,
            token_version: 0,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_suspended(&self) -> bool {
        self.status == UserStatus::Suspended
    }

    /// Admins manage everything; members manage what they own.
    pub fn can_manage(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Lowercase and trim an e-mail address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Member,
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Member => write!(f, "member"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(UserRole::Member),
            "admin" => Ok(UserRole::Admin),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

/// Account state. Suspended users cannot sign in and their tokens stop working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

/// Sign-up request
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// E-mail/password login request, shared by member and admin login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Profile fields a member may change. An empty string clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordInput {
    /// Required when the account already has a password
    pub current_password: Option<String>,
    pub new_password: String,
}

/// Admin user list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    /// Matches name or e-mail
    pub q: Option<String>,
}

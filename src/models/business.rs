//! Business directory model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing in the community business directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    /// Member who created the listing
    pub owner_id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    /// Instagram handle without the leading `@`
    pub instagram: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub logo_url: Option<String>,
    /// Set by an administrator
    #[serde(default)]
    pub is_verified: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Business {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBusinessInput {
    pub name: String,
    pub description: String,
    pub category: String,
    pub slug: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub instagram: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub logo_url: Option<String>,
}

/// Partial update. An empty string clears an optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBusinessInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub slug: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub instagram: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub logo_url: Option<String>,
}

/// Filter for directory listings and exports
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusinessFilter {
    pub category: Option<String>,
    pub city: Option<String>,
    pub verified: Option<bool>,
    pub q: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(skip)]
    pub owner_id: Option<i64>,
}

/// A directory category and how many listings use it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusinessCategory {
    pub category: String,
    pub count: i64,
}

//! Services layer - Business logic
//!
//! Services own the business rules: validation, workflow transitions,
//! ownership checks and token handling. They sit between the HTTP handlers and
//! the repositories.

pub mod blog_post;
pub mod business;
pub mod event;
pub mod export;
pub mod oauth;
pub mod password;
pub mod rate_limiter;
pub mod slug;
pub mod token;
pub mod user;

pub use blog_post::{BlogPostService, BlogPostServiceError};
pub use business::{BusinessService, BusinessServiceError};
pub use event::{EventService, EventServiceError};
pub use export::{export_filename, write_csv, CsvRow};
pub use oauth::{GoogleOAuthProvider, OAuthError, OAuthProfile, OAuthProvider, OAuthStateStore};
pub use password::{hash_password, verify_password};
pub use rate_limiter::{AuthRateLimits, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use slug::generate_slug;
pub use token::{Claims, IssuedToken, TokenError, TokenScope, TokenService};
pub use user::{UserService, UserServiceError};

/// Trim an optional text field. Blank input becomes `None`.
pub(crate) fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Apply a partial update to an optional text field: `None` keeps the current
/// value, an empty string clears it.
pub(crate) fn apply_text(target: &mut Option<String>, update: Option<String>) {
    if let Some(value) = update {
        *target = clean_text(Some(value));
    }
}

/// Trim a required text field, rejecting blank input
pub(crate) fn required_text(value: &str, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(format!("{} cannot be empty", field))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_text() {
        let mut field = Some("old".to_string());
        apply_text(&mut field, None);
        assert_eq!(field.as_deref(), Some("old"));

        apply_text(&mut field, Some("  new ".to_string()));
        assert_eq!(field.as_deref(), Some("new"));

        apply_text(&mut field, Some("   ".to_string()));
        assert!(field.is_none());
    }

    #[test]
    fn test_required_text() {
        assert_eq!(required_text(" Hola ", "Title").unwrap(), "Hola");
        assert_eq!(required_text("  ", "Title").unwrap_err(), "Title cannot be empty");
    }
}

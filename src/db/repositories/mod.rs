//! Database repositories
//!
//! One repository per entity. Each exposes a trait used by the services and
//! a `Sqlx*Repository` implementation backed by the shared pool.

pub mod blog_post;
pub mod business;
pub mod event;
pub mod user;

pub use blog_post::{BlogPostRepository, SqlxBlogPostRepository};
pub use business::{BusinessRepository, SqlxBusinessRepository};
pub use event::{EventRepository, RegistrationOutcome, SqlxEventRepository};
pub use user::{SqlxUserRepository, UserRepository};

/// Whether a repository error was raised by a `UNIQUE` constraint
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db| db.is_unique_violation())
}

/// Build a lowercase `LIKE` pattern for a free-text search, escaping
/// wildcards with `\`. Blank queries yield `None`.
///
/// Only ASCII is folded, the same as SQLite's `LOWER`.
pub(crate) fn like_pattern(q: &str) -> Option<String> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }
    let mut escaped = String::with_capacity(q.len() + 2);
    escaped.push('%');
    for c in q.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    Some(escaped)
}

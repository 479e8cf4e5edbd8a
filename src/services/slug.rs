//! URL slugs for posts, events and businesses

use std::future::Future;

/// Upper bound on `-2`, `-3`, ... suffixes tried before giving up
pub const MAX_SLUG_ATTEMPTS: u32 = 100;

/// Turn a title into a URL-friendly slug.
///
/// Lowercases, maps spaces and ASCII punctuation to hyphens, collapses runs of
/// hyphens and trims them from both ends. Non-ASCII letters (such as `ñ` or
/// `á`) are kept as they are.
pub fn generate_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.trim().to_lowercase().chars() {
        let keep = c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric());
        if keep {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c);
            pending_hyphen = false;
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Slug to use when the title yields nothing usable
pub fn fallback_slug(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// The n-th candidate for a base slug: `base`, `base-2`, `base-3`, ...
pub fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// First free candidate for `base`, probing with `exists`.
///
/// Falls back to a random suffix when every numbered candidate is taken.
pub async fn unique_slug<F, Fut>(base: &str, mut exists: F) -> anyhow::Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    for attempt in 1..=MAX_SLUG_ATTEMPTS {
        let candidate = slug_candidate(base, attempt);
        if !exists(candidate.clone()).await? {
            return Ok(candidate);
        }
    }
    Ok(fallback_slug(base))
}

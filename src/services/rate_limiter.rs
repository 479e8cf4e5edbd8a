//! Sliding-window rate limiting
//!
//! A `RateLimiter` remembers the timestamps of recent hits per key and refuses
//! new ones once `max_requests` fall inside the window. `AuthRateLimits`
//! bundles the limiters guarding the authentication routes:
//! - every `/auth` request, per client IP
//! - member password logins, per client IP
//! - admin logins, per client IP
//! - failed admin logins, per e-mail

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

/// How many hits a key may make per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::seconds(window_secs.min(u64::from(u32::MAX)) as i64),
        }
    }
}

/// Outcome of `RateLimiter::check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Seconds until the oldest hit leaves the window
    Limited { retry_after: u64 },
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitDecision::Limited { .. })
    }
}

/// Keyed sliding-window limiter. Keys are case-insensitive.
pub struct RateLimiter {
    name: &'static str,
    policy: RateLimitPolicy,
    hits: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, policy: RateLimitPolicy) -> Self {
        Self {
            name,
            policy,
            hits: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Count a hit for `key` unless it is over the limit.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now()).await
    }

    async fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut hits = self.hits.write().await;
        let entry = hits.entry(key.to_lowercase()).or_default();
        let cutoff = now - self.policy.window;
        entry.retain(|time| *time > cutoff);

        if entry.len() >= self.policy.max_requests as usize {
            let retry_after = entry
                .first()
                .map(|oldest| (*oldest + self.policy.window - now).num_seconds().max(1))
                .unwrap_or(1);
            tracing::debug!(limiter = self.name, key, retry_after, "Rate limit hit");
            return RateLimitDecision::Limited {
                retry_after: u64::try_from(retry_after).unwrap_or(1),
            };
        }

        entry.push(now);
        RateLimitDecision::Allowed
    }

    /// Whether `key` is over the limit, without counting a hit
    pub async fn is_limited(&self, key: &str) -> Option<u64> {
        let now = Utc::now();
        let cutoff = now - self.policy.window;
        let hits = self.hits.read().await;
        let recent: Vec<_> = hits
            .get(&key.to_lowercase())
            .map(|times| times.iter().filter(|t| **t > cutoff).copied().collect())
            .unwrap_or_default();

        if recent.len() >= self.policy.max_requests as usize {
            let oldest = recent.iter().min().copied().unwrap_or(now);
            let retry_after = (oldest + self.policy.window - now).num_seconds().max(1);
            Some(u64::try_from(retry_after).unwrap_or(1))
        } else {
            None
        }
    }

    /// Count a hit without checking
    pub async fn record(&self, key: &str) {
        let mut hits = self.hits.write().await;
        hits.entry(key.to_lowercase()).or_default().push(Utc::now());
    }

    /// Forget every hit for `key`
    pub async fn clear(&self, key: &str) {
        self.hits.write().await.remove(&key.to_lowercase());
    }

    /// Drop expired hits and empty keys (called periodically)
    pub async fn cleanup(&self) {
        let cutoff = Utc::now() - self.policy.window;
        let mut hits = self.hits.write().await;
        hits.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.hits.read().await.len()
    }
}

/// The limiters guarding the authentication routes
#[derive(Clone)]
pub struct AuthRateLimits {
    pub auth: Arc<RateLimiter>,
    pub user_login: Arc<RateLimiter>,
    pub admin_login: Arc<RateLimiter>,
    pub admin_failures: Arc<RateLimiter>,
}

impl AuthRateLimits {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            auth: Arc::new(RateLimiter::new(
                "auth",
                RateLimitPolicy::new(config.auth_max_requests, config.auth_window_secs),
            )),
            user_login: Arc::new(RateLimiter::new(
                "user_login",
                RateLimitPolicy::new(config.login_max_attempts, config.login_window_secs),
            )),
            admin_login: Arc::new(RateLimiter::new(
                "admin_login",
                RateLimitPolicy::new(config.admin_login_max_attempts, config.login_window_secs),
            )),
            admin_failures: Arc::new(RateLimiter::new(
                "admin_failures",
                RateLimitPolicy::new(config.admin_login_max_attempts, config.login_window_secs),
            )),
        }
    }

    pub async fn cleanup(&self) {
        self.auth.cleanup().await;
        self.user_login.cleanup().await;
        self.admin_login.cleanup().await;
        self.admin_failures.cleanup().await;
    }
}

impl Default for AuthRateLimits {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

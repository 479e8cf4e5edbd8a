//! API middleware
//!
//! Contains:
//! - Application state shared by all handlers
//! - The JSON error envelope and service error mapping
//! - Authentication (JWT from bearer header or cookie) and admin authorization
//! - Per-IP rate limiting for the authentication routes
//! - Request statistics

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::repositories::{
    SqlxBlogPostRepository, SqlxBusinessRepository, SqlxEventRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{User, UserRole};
use crate::services::{
    AuthRateLimits, BlogPostService, BlogPostServiceError, BusinessService, BusinessServiceError,
    EventService, EventServiceError, GoogleOAuthProvider, OAuthError, OAuthProvider,
    OAuthStateStore, RateLimitDecision, TokenScope, TokenService, UserService, UserServiceError,
};

/// Member session cookie
pub const USER_COOKIE: &str = "token";
/// Admin session cookie
pub const ADMIN_COOKIE: &str = "admin_token";

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Sum of response times in microseconds
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64 / 1000.0
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Cookie and redirect settings for the authentication handlers
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Where OAuth callbacks send the browser back to
    pub frontend_url: String,
    /// Adds `Secure` to session cookies
    pub cookie_secure: bool,
}

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub blog_post_service: Arc<BlogPostService>,
    pub event_service: Arc<EventService>,
    pub business_service: Arc<BusinessService>,
    /// Absent when Google sign-in is not configured
    pub oauth_provider: Option<Arc<dyn OAuthProvider>>,
    pub oauth_states: OAuthStateStore,
    pub rate_limits: AuthRateLimits,
    pub auth_settings: Arc<AuthSettings>,
    pub request_stats: Arc<RequestStats>,
}

impl AppState {
    /// Wire repositories, services and limiters from the configuration
    pub fn from_config(pool: DynDatabasePool, config: &Config) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenService::new(
            &config.jwt_secret()?,
            config.auth.user_token_ttl_hours,
            config.auth.admin_token_ttl_hours,
        ));

        let oauth_provider = GoogleOAuthProvider::from_config(&config.google)
            .map(|provider| Arc::new(provider) as Arc<dyn OAuthProvider>);
        if oauth_provider.is_none() {
            tracing::info!("Google sign-in is not configured");
        }

        Ok(Self {
            user_service: Arc::new(UserService::new(
                SqlxUserRepository::boxed(pool.clone()),
                tokens,
            )),
            blog_post_service: Arc::new(BlogPostService::new(SqlxBlogPostRepository::boxed(
                pool.clone(),
            ))),
            event_service: Arc::new(EventService::new(SqlxEventRepository::boxed(pool.clone()))),
            business_service: Arc::new(BusinessService::new(SqlxBusinessRepository::boxed(
                pool.clone(),
            ))),
            pool,
            oauth_provider,
            oauth_states: OAuthStateStore::default(),
            rate_limits: AuthRateLimits::from_config(&config.rate_limit),
            auth_settings: Arc::new(AuthSettings {
                frontend_url: config.auth.frontend_url.trim_end_matches('/').to_string(),
                cookie_secure: config.auth.cookie_secure,
            }),
            request_stats: Arc::new(RequestStats::new()),
        })
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    /// Which login issued the token
    pub scope: TokenScope,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

// ============================================================================
// Error Envelope
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("INVALID_STATE", message)
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new("NOT_CONFIGURED", message)
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self::with_details(
            "RATE_LIMITED",
            "Too many requests, please try again later",
            serde_json::json!({ "retry_after": retry_after }),
        )
    }

    /// Log the cause and hide it from the client
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Internal error");
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" | "TOKEN_EXPIRED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" | "USER_SUSPENDED" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" | "INVALID_STATE" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "NOT_CONFIGURED" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        self.error
            .details
            .as_ref()
            .and_then(|d| d.get("retry_after"))
            .and_then(serde_json::Value::as_u64)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after().filter(|_| status == StatusCode::TOO_MANY_REQUESTS);

        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::Suspended => {
                ApiError::new("USER_SUSPENDED", "This account has been suspended")
            }
            UserServiceError::TokenExpired => {
                ApiError::new("TOKEN_EXPIRED", "Session has expired, please log in again")
            }
            UserServiceError::NotFound(msg) => ApiError::not_found(msg),
            UserServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            UserServiceError::InternalError(err) => ApiError::internal(err),
        }
    }
}

impl From<BlogPostServiceError> for ApiError {
    fn from(e: BlogPostServiceError) -> Self {
        match e {
            BlogPostServiceError::NotFound(_) => ApiError::not_found("Blog post not found"),
            BlogPostServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            BlogPostServiceError::DuplicateSlug(slug) => ApiError::with_details(
                "CONFLICT",
                "A blog post with this slug already exists",
                serde_json::json!({ "slug": slug }),
            ),
            BlogPostServiceError::InvalidTransition { from, to } => ApiError::with_details(
                "INVALID_STATE",
                format!("Cannot change post from {} to {}", from, to),
                serde_json::json!({ "from": from, "to": to }),
            ),
            BlogPostServiceError::InternalError(err) => ApiError::internal(err),
        }
    }
}

impl From<EventServiceError> for ApiError {
    fn from(e: EventServiceError) -> Self {
        match e {
            EventServiceError::NotFound(_) => ApiError::not_found("Event not found"),
            EventServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            EventServiceError::DuplicateSlug(slug) => ApiError::with_details(
                "CONFLICT",
                "An event with this slug already exists",
                serde_json::json!({ "slug": slug }),
            ),
            EventServiceError::InvalidTransition { from, to } => ApiError::with_details(
                "INVALID_STATE",
                format!("Cannot change event from {} to {}", from, to),
                serde_json::json!({ "from": from, "to": to }),
            ),
            EventServiceError::InvalidState(msg) => ApiError::invalid_state(msg),
            EventServiceError::AlreadyRegistered => {
                ApiError::conflict("You are already registered for this event")
            }
            EventServiceError::EventFull => ApiError::with_details(
                "CONFLICT",
                "This event is full",
                serde_json::json!({ "reason": "full" }),
            ),
            EventServiceError::NotRegistered => {
                ApiError::not_found("You are not registered for this event")
            }
            EventServiceError::InternalError(err) => ApiError::internal(err),
        }
    }
}

impl From<BusinessServiceError> for ApiError {
    fn from(e: BusinessServiceError) -> Self {
        match e {
            BusinessServiceError::NotFound(_) => ApiError::not_found("Business not found"),
            BusinessServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            BusinessServiceError::DuplicateSlug(slug) => ApiError::with_details(
                "CONFLICT",
                "A business with this slug already exists",
                serde_json::json!({ "slug": slug }),
            ),
            BusinessServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            BusinessServiceError::InternalError(err) => ApiError::internal(err),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::NotConfigured => ApiError::not_configured("Google sign-in is not configured"),
            OAuthError::InvalidState => ApiError::validation_error("Invalid or expired OAuth state"),
            OAuthError::Exchange(msg) => ApiError::internal(msg),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Bearer token first, then the named cookies in order
fn extract_token(headers: &HeaderMap, cookies: &[&str]) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.iter().find_map(|name| {
        cookie_header.split(';').find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key == *name && !value.is_empty()).then(|| value.to_string())
        })
    })
}

async fn authenticate(
    state: &AppState,
    request: &mut Request,
    cookies: &[&str],
) -> Result<AuthenticatedUser, ApiError> {
    let token = extract_token(request.headers(), cookies)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let (user, claims) = state.user_service.authenticate(&token).await?;
    let authenticated = AuthenticatedUser {
        user,
        scope: claims.scope,
    };
    request.extensions_mut().insert(authenticated.clone());
    Ok(authenticated)
}

/// Authentication middleware for member routes
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&state, &mut request, &[USER_COOKIE, ADMIN_COOKIE]).await?;
    Ok(next.run(request).await)
}

/// Admin authorization middleware.
///
/// Needs a token from the admin login and a user that still has the admin role.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = authenticate(&state, &mut request, &[ADMIN_COOKIE]).await?;

    if auth.scope != TokenScope::Admin {
        return Err(ApiError::forbidden("Admin login required"));
    }
    if auth.user.role != UserRole::Admin {
        tracing::warn!(user_id = auth.user.id, "Admin token used by non-admin user");
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Client IP: `X-Forwarded-For`, then `X-Real-IP`, then the socket address
pub fn client_ip(headers: &HeaderMap, connect_info: Option<SocketAddr>) -> String {
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return ip.to_string();
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return ip.to_string();
    }

    connect_info
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Client IP of a request
pub fn request_ip(request: &Request) -> String {
    let connect_info = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    client_ip(request.headers(), connect_info)
}

/// Per-IP limit on every authentication route
pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = request_ip(&request);
    if let RateLimitDecision::Limited { retry_after } = state.rate_limits.auth.check(&ip).await {
        tracing::warn!(%ip, path = %request.uri().path(), "Auth rate limit exceeded");
        return Err(ApiError::rate_limited(retry_after));
    }
    Ok(next.run(request).await)
}

/// Request statistics middleware
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;

    let duration_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    state.request_stats.record(duration_us);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let h = headers(&[
            ("authorization", "Bearer abc"),
            ("cookie", "token=fromcookie"),
        ]);
        assert_eq!(extract_token(&h, &[USER_COOKIE]).as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_token_cookie_order() {
        let h = headers(&[("cookie", "theme=dark; admin_token=adm; token=usr")]);
        assert_eq!(
            extract_token(&h, &[USER_COOKIE, ADMIN_COOKIE]).as_deref(),
            Some("usr")
        );
        assert_eq!(extract_token(&h, &[ADMIN_COOKIE]).as_deref(), Some("adm"));

        let only_member = headers(&[("cookie", "token=usr")]);
        assert!(extract_token(&only_member, &[ADMIN_COOKIE]).is_none());
    }

    #[test]
    fn test_client_ip() {
        let forwarded = headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1")]);
        assert_eq!(client_ip(&forwarded, None), "203.0.113.5");

        let real = headers(&[("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_ip(&real, None), "198.51.100.7");

        let addr: SocketAddr = "192.0.2.1:4000".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(addr)), "192.0.2.1");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::validation_error("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::new("TOKEN_EXPIRED", "x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::new("USER_SUSPENDED", "x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::invalid_state("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::not_configured("x").status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::new("SOMETHING", "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = ApiError::rate_limited(42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_request_stats() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_ms(), 0.0);
        stats.record(1000);
        stats.record(3000);
        assert_eq!(stats.total_requests(), 2);
        assert!((stats.avg_response_time_ms() - 2.0).abs() < f64::EPSILON);
    }
}

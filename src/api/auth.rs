//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Member sign-up
//! - POST /api/v1/auth/login - Member login
//! - POST /api/v1/auth/admin/login - Admin login
//! - GET /api/v1/auth/google - Start Google sign-in
//! - GET /api/v1/auth/google/callback - Finish Google sign-in
//! - POST /api/v1/auth/logout - Clear session cookies
//! - GET|PUT /api/v1/auth/me - Current user
//! - PUT /api/v1/auth/password - Change password
//! - POST /api/v1/auth/logout-all - Revoke every session

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::common::{clear_cookie, session_cookie, set_cookies, SuccessResponse};
use crate::api::middleware::{
    auth_rate_limit, request_ip, ApiError, AppState, AuthenticatedUser, ADMIN_COOKIE, USER_COOKIE,
};
use crate::models::{ChangePasswordInput, LoginInput, RegisterInput, UpdateProfileInput, User};
use crate::services::{IssuedToken, OAuthError, RateLimitDecision, TokenScope, UserServiceError};

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthResponse {
    fn new(user: User, token: IssuedToken) -> Self {
        Self {
            user,
            token: token.token,
            expires_at: token.expires_at,
        }
    }
}

/// Response after a password change
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Query string of the Google callback
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Public auth routes. All but logout count against the per-IP auth limit.
pub fn public_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/admin/login", post(admin_login))
        .route("/google", get(google_start))
        .route("/google/callback", get(google_callback))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_rate_limit))
        .route("/logout", post(logout))
}

/// Auth routes for signed-in users, under the same per-IP auth limit
pub fn protected_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_user).put(update_profile))
        .route("/password", put(change_password))
        .route("/logout-all", post(logout_all))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_rate_limit))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterInput>,
) -> Result<Response, ApiError> {
    let (user, token) = state.user_service.register(body).await?;

    let headers = set_cookies([session_cookie(
        TokenScope::User,
        &token,
        state.auth_settings.cookie_secure,
    )])?;
    Ok((StatusCode::CREATED, headers, Json(AuthResponse::new(user, token))).into_response())
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let ip = request_ip(&request);
    let Json(body): Json<LoginInput> = extract_json(request).await?;

    if let RateLimitDecision::Limited { retry_after } =
        state.rate_limits.user_login.check(&ip).await
    {
        tracing::warn!(%ip, "Member login rate limit exceeded");
        return Err(ApiError::rate_limited(retry_after));
    }

    let (user, token) = state.user_service.login(body, TokenScope::User).await?;

    let headers = set_cookies([session_cookie(
        TokenScope::User,
        &token,
        state.auth_settings.cookie_secure,
    )])?;
    Ok((headers, Json(AuthResponse::new(user, token))).into_response())
}

/// POST /api/v1/auth/admin/login
///
/// Stricter than the member login: limited per IP, and failed attempts are
/// also counted per e-mail until a successful login clears them.
async fn admin_login(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let ip = request_ip(&request);
    let Json(body): Json<LoginInput> = extract_json(request).await?;
    let limits = &state.rate_limits;

    if let RateLimitDecision::Limited { retry_after } = limits.admin_login.check(&ip).await {
        tracing::warn!(%ip, "Admin login rate limit exceeded");
        return Err(ApiError::rate_limited(retry_after));
    }
    let email = body.email.trim().to_lowercase();
    if let Some(retry_after) = limits.admin_failures.is_limited(&email).await {
        tracing::warn!(%ip, "Admin login locked after repeated failures");
        return Err(ApiError::rate_limited(retry_after));
    }

    let (user, token) = match state.user_service.login(body, TokenScope::Admin).await {
        Ok(result) => result,
        Err(e) => {
            if matches!(e, UserServiceError::AuthenticationError(_)) {
                limits.admin_failures.record(&email).await;
            }
            return Err(e.into());
        }
    };
    limits.admin_failures.clear(&email).await;

    let headers = set_cookies([session_cookie(
        TokenScope::Admin,
        &token,
        state.auth_settings.cookie_secure,
    )])?;
    Ok((headers, Json(AuthResponse::new(user, token))).into_response())
}

/// GET /api/v1/auth/google - Redirect to the Google consent page
async fn google_start(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let provider = state
        .oauth_provider
        .as_ref()
        .ok_or(OAuthError::NotConfigured)?;

    let oauth_state = state.oauth_states.issue().await;
    Ok(Redirect::to(&provider.authorize_url(&oauth_state)))
}

/// GET /api/v1/auth/google/callback
///
/// Always answers with a redirect to the frontend: on success it carries the
/// token, on failure an `error` code.
async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Response, ApiError> {
    let provider = state
        .oauth_provider
        .clone()
        .ok_or(OAuthError::NotConfigured)?;
    let frontend = state.auth_settings.frontend_url.trim_end_matches('/');
    let failure = |reason: &str| {
        Redirect::to(&format!("{}/login?error={}", frontend, reason)).into_response()
    };

    if let Some(error) = query.error {
        tracing::info!(%error, "Google sign-in cancelled");
        return Ok(failure("oauth_failed"));
    }
    let checked = match query.state.as_deref() {
        Some(s) => state.oauth_states.consume(s).await,
        None => Err(OAuthError::InvalidState),
    };
    if let Err(e) = checked {
        tracing::warn!(error = %e, "Google callback rejected");
        return Ok(failure("oauth_failed"));
    }
    let Some(code) = query.code else {
        tracing::warn!("Google callback without an authorization code");
        return Ok(failure("oauth_failed"));
    };

    let profile = match provider.exchange_code(&code).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(error = %e, "Google code exchange failed");
            return Ok(failure("oauth_failed"));
        }
    };

    let (_, token) = match state.user_service.login_with_google(profile).await {
        Ok(result) => result,
        Err(UserServiceError::Suspended) => return Ok(failure("suspended")),
        Err(e) => {
            tracing::warn!(error = %e, "Google sign-in rejected");
            return Ok(failure("oauth_failed"));
        }
    };

    let headers = set_cookies([session_cookie(
        TokenScope::User,
        &token,
        state.auth_settings.cookie_secure,
    )])?;
    let target = format!(
        "{}/auth/callback?token={}",
        frontend,
        urlencoding::encode(&token.token)
    );
    Ok((headers, Redirect::to(&target)).into_response())
}

/// POST /api/v1/auth/logout - Drop both session cookies
async fn logout(State(state): State<AppState>) -> Result<Response, ApiError> {
    let secure = state.auth_settings.cookie_secure;
    let headers = set_cookies([
        clear_cookie(USER_COOKIE, secure),
        clear_cookie(ADMIN_COOKIE, secure),
    ])?;
    Ok((headers, Json(SuccessResponse::ok())).into_response())
}

/// GET /api/v1/auth/me
async fn get_current_user(auth: AuthenticatedUser) -> Json<User> {
    Json(auth.user)
}

/// PUT /api/v1/auth/me
async fn update_profile(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<User>, ApiError> {
    let user = state.user_service.update_profile(auth.user.id, body).await?;
    Ok(Json(user))
}

/// PUT /api/v1/auth/password
///
/// Older tokens stop working; the response carries a replacement.
async fn change_password(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<ChangePasswordInput>,
) -> Result<Response, ApiError> {
    let token = state
        .user_service
        .change_password(auth.user.id, body, auth.scope)
        .await?;

    let headers = set_cookies([session_cookie(
        auth.scope,
        &token,
        state.auth_settings.cookie_secure,
    )])?;
    let body = TokenResponse {
        token: token.token,
        expires_at: token.expires_at,
    };
    Ok((headers, Json(body)).into_response())
}

/// POST /api/v1/auth/logout-all
async fn logout_all(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Response, ApiError> {
    state.user_service.logout_everywhere(auth.user.id).await?;

    let secure = state.auth_settings.cookie_secure;
    let headers = set_cookies([
        clear_cookie(USER_COOKIE, secure),
        clear_cookie(ADMIN_COOKIE, secure),
    ])?;
    Ok((headers, Json(SuccessResponse::ok())).into_response())
}

/// Read a JSON body after the handler has looked at the request head
async fn extract_json<T>(request: Request) -> Result<Json<T>, ApiError>
where
    T: serde::de::DeserializeOwned,
{
    use axum::extract::FromRequest;

    Json::<T>::from_request(request, &())
        .await
        .map_err(|rejection| ApiError::validation_error(rejection.body_text()))
}

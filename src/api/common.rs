//! Common API utilities and shared types

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, ADMIN_COOKIE, USER_COOKIE};
use crate::models::{ListParams, PagedResult};
use crate::services::{export_filename, IssuedToken, TokenScope};

// ============================================================================
// Pagination
// ============================================================================

/// `?page=&per_page=` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::from_query(self.page, self.per_page)
    }
}

/// Paginated list response
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> From<PagedResult<T>> for PageResponse<T> {
    fn from(result: PagedResult<T>) -> Self {
        let total_pages = result.total_pages();
        Self {
            items: result.items,
            total: result.total,
            page: result.page,
            per_page: result.per_page,
            total_pages,
        }
    }
}

/// `{"success": true}` body for operations without a payload
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

// ============================================================================
// CSV
// ============================================================================

/// CSV download named `{prefix}-YYYY-MM-DD.csv`
pub fn csv_response(prefix: &str, body: Vec<u8>) -> Result<Response, ApiError> {
    let disposition = format!("attachment; filename=\"{}\"", export_filename(prefix));
    let disposition = HeaderValue::from_str(&disposition).map_err(ApiError::internal)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((StatusCode::OK, headers, body).into_response())
}

// ============================================================================
// Cookies
// ============================================================================

/// Cookie carrying tokens of the given scope
pub fn cookie_name(scope: TokenScope) -> &'static str {
    match scope {
        TokenScope::User => USER_COOKIE,
        TokenScope::Admin => ADMIN_COOKIE,
    }
}

/// HttpOnly session cookie for a freshly issued token
pub fn session_cookie(scope: TokenScope, token: &IssuedToken, secure: bool) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        cookie_name(scope),
        token.token,
        token.max_age_secs,
        if secure { "; Secure" } else { "" }
    )
}

/// Expired cookie that makes the browser drop the session
pub fn clear_cookie(name: &str, secure: bool) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
        name,
        if secure { "; Secure" } else { "" }
    )
}

/// Append `Set-Cookie` headers
pub fn set_cookies<I>(cookies: I) -> Result<HeaderMap, ApiError>
where
    I: IntoIterator<Item = String>,
{
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie).map_err(ApiError::internal)?;
        headers.append(header::SET_COOKIE, value);
    }
    Ok(headers)
}

//! Business directory API endpoints
//!
//! Public:
//! - GET /api/v1/businesses
//! - GET /api/v1/businesses/categories
//! - GET /api/v1/businesses/{slug}
//!
//! Member (owner or admin):
//! - POST /api/v1/businesses
//! - PUT|DELETE /api/v1/businesses/{id}
//! - GET /api/v1/me/businesses
//!
//! Admin:
//! - GET /api/v1/admin/businesses[/export]
//! - PUT /api/v1/admin/businesses/{id}/verify
//! - POST /api/v1/admin/businesses/{id}/restore

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{csv_response, PageResponse, PaginationQuery, SuccessResponse};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    Business, BusinessCategory, BusinessFilter, CreateBusinessInput, UpdateBusinessInput,
};

/// Body of the verify endpoint
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub verified: bool,
}

/// Public routes. `/{id}` is read as a slug here, see `member_router`.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_businesses))
        .route("/categories", get(list_categories))
        .route("/{id}", get(get_business))
}

pub fn member_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_business))
        .route("/{id}", put(update_business).delete(delete_business))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_businesses))
        .route("/export", get(export_businesses))
        .route("/{id}/verify", put(verify_business))
        .route("/{id}/restore", post(restore_business))
}

async fn list_businesses(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<BusinessFilter>,
) -> Result<Json<PageResponse<Business>>, ApiError> {
    let result = state
        .business_service
        .list_public(filter, &page.params())
        .await?;
    Ok(Json(result.into()))
}

async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<BusinessCategory>>, ApiError> {
    Ok(Json(state.business_service.categories().await?))
}

async fn get_business(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Business>, ApiError> {
    Ok(Json(state.business_service.get_public_by_slug(&slug).await?))
}

async fn create_business(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<CreateBusinessInput>,
) -> Result<(StatusCode, Json<Business>), ApiError> {
    let business = state.business_service.create(body, auth.user.id).await?;
    Ok((StatusCode::CREATED, Json(business)))
}

async fn update_business(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBusinessInput>,
) -> Result<Json<Business>, ApiError> {
    Ok(Json(
        state.business_service.update(id, body, &auth.user).await?,
    ))
}

async fn delete_business(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.business_service.soft_delete(id, &auth.user).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// GET /api/v1/me/businesses
pub async fn my_businesses(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<Business>>, ApiError> {
    Ok(Json(
        state.business_service.list_for_owner(auth.user.id).await?,
    ))
}

async fn admin_list_businesses(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<BusinessFilter>,
) -> Result<Json<PageResponse<Business>>, ApiError> {
    let result = state
        .business_service
        .list_admin(&filter, &page.params())
        .await?;
    Ok(Json(result.into()))
}

async fn export_businesses(
    State(state): State<AppState>,
    Query(filter): Query<BusinessFilter>,
) -> Result<Response, ApiError> {
    let csv = state.business_service.export_csv(&filter).await?;
    csv_response("businesses", csv)
}

async fn verify_business(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<Business>, ApiError> {
    Ok(Json(
        state.business_service.set_verified(id, body.verified).await?,
    ))
}

async fn restore_business(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Business>, ApiError> {
    Ok(Json(state.business_service.restore(id).await?))
}

//! Blog post API endpoints
//!
//! Public:
//! - GET /api/v1/posts - Published posts
//! - GET /api/v1/posts/{slug} - Single published post
//!
//! Admin:
//! - GET|POST /api/v1/admin/posts
//! - GET /api/v1/admin/posts/export
//! - GET|PUT|DELETE /api/v1/admin/posts/{id}
//! - POST /api/v1/admin/posts/{id}/publish|unpublish|restore

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use crate::api::common::{csv_response, PageResponse, PaginationQuery, SuccessResponse};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{BlogPost, BlogPostFilter, CreateBlogPostInput, UpdateBlogPostInput};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts))
        .route("/{slug}", get(get_post))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_posts).post(create_post))
        .route("/export", get(export_posts))
        .route(
            "/{id}",
            get(admin_get_post).put(update_post).delete(delete_post),
        )
        .route("/{id}/publish", post(publish_post))
        .route("/{id}/unpublish", post(unpublish_post))
        .route("/{id}/restore", post(restore_post))
}

/// GET /api/v1/posts
async fn list_posts(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<BlogPostFilter>,
) -> Result<Json<PageResponse<BlogPost>>, ApiError> {
    let result = state
        .blog_post_service
        .list_public(filter, &page.params())
        .await?;
    Ok(Json(result.into()))
}

/// GET /api/v1/posts/{slug}
async fn get_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_post_service.get_public_by_slug(&slug).await?))
}

/// GET /api/v1/admin/posts - Any status, optionally including deleted posts
async fn admin_list_posts(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<BlogPostFilter>,
) -> Result<Json<PageResponse<BlogPost>>, ApiError> {
    let result = state
        .blog_post_service
        .list_admin(&filter, &page.params())
        .await?;
    Ok(Json(result.into()))
}

/// POST /api/v1/admin/posts
async fn create_post(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<CreateBlogPostInput>,
) -> Result<(StatusCode, Json<BlogPost>), ApiError> {
    let post = state.blog_post_service.create(body, auth.user.id).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /api/v1/admin/posts/export
async fn export_posts(
    State(state): State<AppState>,
    Query(filter): Query<BlogPostFilter>,
) -> Result<Response, ApiError> {
    let csv = state.blog_post_service.export_csv(&filter).await?;
    csv_response("blog-posts", csv)
}

async fn admin_get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_post_service.get_by_id(id).await?))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBlogPostInput>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_post_service.update(id, body).await?))
}

/// DELETE /api/v1/admin/posts/{id} - Soft delete
async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.blog_post_service.soft_delete(id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn publish_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_post_service.publish(id).await?))
}

async fn unpublish_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_post_service.unpublish(id).await?))
}

async fn restore_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlogPost>, ApiError> {
    Ok(Json(state.blog_post_service.restore(id).await?))
}

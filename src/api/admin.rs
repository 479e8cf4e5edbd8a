//! Admin API endpoints
//!
//! - GET /api/v1/admin/stats - Dashboard counters and request statistics
//! - GET /api/v1/admin/users - List users
//! - GET /api/v1/admin/users/export - Users as CSV
//! - PUT /api/v1/admin/users/{id}/role - Change role
//! - PUT /api/v1/admin/users/{id}/status - Suspend or reactivate

use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{csv_response, PageResponse, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    BlogPostFilter, BlogPostStatus, BusinessFilter, EventFilter, EventStatus, User, UserFilter,
    UserRole, UserStatus,
};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub total: i64,
    pub admins: i64,
    pub suspended: i64,
}

#[derive(Debug, Serialize)]
pub struct PostStats {
    pub published: i64,
    pub drafts: i64,
}

#[derive(Debug, Serialize)]
pub struct EventStats {
    /// Published events that have not ended
    pub upcoming: i64,
    pub cancelled: i64,
    pub registrations: i64,
}

#[derive(Debug, Serialize)]
pub struct BusinessStats {
    pub total: i64,
    pub verified: i64,
}

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
}

/// Response for GET /admin/stats
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub users: UserStats,
    pub posts: PostStats,
    pub events: EventStats,
    pub businesses: BusinessStats,
    pub server: ServerStats,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: UserStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/users", get(list_users))
        .route("/users/export", get(export_users))
        .route("/users/{id}/role", put(update_role))
        .route("/users/{id}/status", put(update_status))
}

/// GET /api/v1/admin/stats
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let users = UserStats {
        total: state.user_service.count(&UserFilter::default()).await?,
        admins: state
            .user_service
            .count(&UserFilter {
                role: Some(UserRole::Admin),
                ..Default::default()
            })
            .await?,
        suspended: state
            .user_service
            .count(&UserFilter {
                status: Some(UserStatus::Suspended),
                ..Default::default()
            })
            .await?,
    };

    let posts = PostStats {
        published: state
            .blog_post_service
            .count(&BlogPostFilter {
                status: Some(BlogPostStatus::Published),
                ..Default::default()
            })
            .await?,
        drafts: state
            .blog_post_service
            .count(&BlogPostFilter {
                status: Some(BlogPostStatus::Draft),
                ..Default::default()
            })
            .await?,
    };

    let events = EventStats {
        upcoming: state
            .event_service
            .count(&EventFilter {
                status: Some(EventStatus::Published),
                upcoming: Some(true),
                ..Default::default()
            })
            .await?,
        cancelled: state
            .event_service
            .count(&EventFilter {
                status: Some(EventStatus::Cancelled),
                ..Default::default()
            })
            .await?,
        registrations: state.event_service.count_registrations().await?,
    };

    let businesses = BusinessStats {
        total: state
            .business_service
            .count(&BusinessFilter::default())
            .await?,
        verified: state
            .business_service
            .count(&BusinessFilter {
                verified: Some(true),
                ..Default::default()
            })
            .await?,
    };

    let uptime_seconds = state.request_stats.uptime_seconds();
    let server = ServerStats {
        version: APP_VERSION,
        uptime_seconds,
        uptime_formatted: format_uptime(uptime_seconds),
        total_requests: state.request_stats.total_requests(),
        avg_response_time_ms: state.request_stats.avg_response_time_ms(),
    };

    Ok(Json(StatsResponse {
        users,
        posts,
        events,
        businesses,
        server,
    }))
}

/// Format uptime to human readable string
fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<UserFilter>,
) -> Result<Json<PageResponse<User>>, ApiError> {
    let result = state.user_service.list(&filter, &page.params()).await?;
    Ok(Json(result.into()))
}

async fn export_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
) -> Result<Response, ApiError> {
    let csv = state.user_service.export_csv(&filter).await?;
    csv_response("users", csv)
}

async fn update_role(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<RoleRequest>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(
        state.user_service.set_role(&auth.user, id, body.role).await?,
    ))
}

async fn update_status(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(
        state
            .user_service
            .set_status(&auth.user, id, body.status)
            .await?,
    ))
}

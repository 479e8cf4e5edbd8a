//! Event API endpoints
//!
//! Public:
//! - GET /api/v1/events - Published and cancelled events
//! - GET /api/v1/events/{slug} - Single event
//!
//! Member:
//! - POST|DELETE /api/v1/events/{id}/rsvp - RSVP / cancel RSVP
//! - GET /api/v1/me/events - My RSVPs
//!
//! Admin:
//! - GET|POST /api/v1/admin/events
//! - GET /api/v1/admin/events/export
//! - GET|PUT|DELETE /api/v1/admin/events/{id}
//! - POST /api/v1/admin/events/{id}/publish|unpublish|cancel|restore
//! - GET /api/v1/admin/events/{id}/attendees[/export]
//!
//! The public detail route shares its path segment with the RSVP routes, so it
//! is registered as `{id}` and read as a slug.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use crate::api::common::{csv_response, PageResponse, PaginationQuery, SuccessResponse};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    Attendee, CancelEventInput, CreateEventInput, Event, EventFilter, EventRegistration,
    EventWithAttendance, UpdateEventInput,
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_events))
        .route("/{id}", get(get_event))
}

/// Routes mounted under `/events` for signed-in members
pub fn member_router() -> Router<AppState> {
    Router::new().route("/{id}/rsvp", post(rsvp).delete(cancel_rsvp))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_events).post(create_event))
        .route("/export", get(export_events))
        .route(
            "/{id}",
            get(admin_get_event).put(update_event).delete(delete_event),
        )
        .route("/{id}/publish", post(publish_event))
        .route("/{id}/unpublish", post(unpublish_event))
        .route("/{id}/cancel", post(cancel_event))
        .route("/{id}/restore", post(restore_event))
        .route("/{id}/attendees", get(list_attendees))
        .route("/{id}/attendees/export", get(export_attendees))
}

/// GET /api/v1/events - Upcoming by default, pass `upcoming=false` for all
async fn list_events(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<PageResponse<EventWithAttendance>>, ApiError> {
    let result = state
        .event_service
        .list_public(filter, &page.params())
        .await?;
    Ok(Json(result.into()))
}

/// GET /api/v1/events/{slug}
async fn get_event(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<EventWithAttendance>, ApiError> {
    Ok(Json(state.event_service.get_public_by_slug(&slug).await?))
}

/// POST /api/v1/events/{id}/rsvp
async fn rsvp(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<EventRegistration>), ApiError> {
    let registration = state.event_service.register(id, &auth.user).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// DELETE /api/v1/events/{id}/rsvp
async fn cancel_rsvp(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.event_service.unregister(id, auth.user.id).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// GET /api/v1/me/events
pub async fn my_events(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<EventWithAttendance>>, ApiError> {
    Ok(Json(
        state
            .event_service
            .registrations_for_user(auth.user.id)
            .await?,
    ))
}

async fn admin_list_events(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<PageResponse<EventWithAttendance>>, ApiError> {
    let result = state
        .event_service
        .list_admin(&filter, &page.params())
        .await?;
    Ok(Json(result.into()))
}

async fn create_event(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<CreateEventInput>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.event_service.create(body, auth.user.id).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn export_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<Response, ApiError> {
    let csv = state.event_service.export_csv(&filter).await?;
    csv_response("events", csv)
}

async fn admin_get_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EventWithAttendance>, ApiError> {
    Ok(Json(state.event_service.get_by_id(id).await?))
}

async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateEventInput>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.event_service.update(id, body).await?))
}

async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.event_service.soft_delete(id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn publish_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.event_service.publish(id).await?))
}

async fn unpublish_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.event_service.unpublish(id).await?))
}

/// POST /api/v1/admin/events/{id}/cancel - Body `{"reason": "..."}` is optional
async fn cancel_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<Event>, ApiError> {
    let input: CancelEventInput = if body.iter().all(u8::is_ascii_whitespace) {
        CancelEventInput::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::validation_error(e.to_string()))?
    };
    Ok(Json(state.event_service.cancel(id, input).await?))
}

async fn restore_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.event_service.restore(id).await?))
}

async fn list_attendees(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Attendee>>, ApiError> {
    Ok(Json(state.event_service.attendees(id).await?))
}

async fn export_attendees(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let csv = state.event_service.export_attendees_csv(id).await?;
    csv_response(&format!("event-{}-attendees", id), csv)
}

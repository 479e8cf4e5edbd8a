//! Event service
//!
//! Community events: draft/published/cancelled workflow, soft deletes and
//! member RSVPs with optional capacity.

use crate::db::repositories::{EventRepository, RegistrationOutcome};
use crate::models::{
    Attendee, CancelEventInput, CreateEventInput, Event, EventFilter, EventRegistration,
    EventStatus, EventWithAttendance, ListParams, PagedResult, UpdateEventInput, User,
};
use crate::services::export::{write_csv, AttendeeCsvRow, EventCsvRow};
use crate::services::slug::{fallback_slug, generate_slug, unique_slug};
use crate::services::{apply_text, clean_text, required_text};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

const MAX_TITLE_LENGTH: usize = 200;

/// Error types for event operations
#[derive(Debug, thiserror::Error)]
pub enum EventServiceError {
    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Cannot change event from {from} to {to}")]
    InvalidTransition { from: EventStatus, to: EventStatus },

    /// The event is in a state that does not allow the operation
    #[error("{0}")]
    InvalidState(String),

    #[error("Already registered for this event")]
    AlreadyRegistered,

    #[error("Event is full")]
    EventFull,

    #[error("Not registered for this event")]
    NotRegistered,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct EventService {
    repo: Arc<dyn EventRepository>,
}

impl EventService {
    pub fn new(repo: Arc<dyn EventRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(
        &self,
        input: CreateEventInput,
        organizer_id: i64,
    ) -> Result<Event, EventServiceError> {
        let title = validate_title(&input.title)?;
        let description = required_text(&input.description, "Description")
            .map_err(EventServiceError::ValidationError)?;
        let slug = self.resolve_slug(input.slug.as_deref(), &title, None).await?;

        let now = Utc::now();
        let status = input.status.unwrap_or_default();
        if status == EventStatus::Cancelled {
            return Err(EventServiceError::ValidationError(
                "New events must be draft or published".to_string(),
            ));
        }

        let event = Event {
            id: 0,
            slug,
            title,
            description,
            category: clean_text(input.category),
            location: clean_text(input.location),
            is_online: input.is_online,
            meeting_url: clean_text(input.meeting_url),
            cover_image: clean_text(input.cover_image),
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            capacity: input.capacity,
            organizer_id,
            status,
            cancellation_reason: None,
            published_at: (status == EventStatus::Published).then_some(now),
            cancelled_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        validate_schedule(&event)?;

        let created = self
            .repo
            .create(&event)
            .await
            .context("Failed to create event")?;

        tracing::info!(event_id = created.id, slug = %created.slug, %status, "Event created");
        Ok(created)
    }

    /// Partial update. Deleted and cancelled events cannot be edited.
    pub async fn update(
        &self,
        id: i64,
        input: UpdateEventInput,
    ) -> Result<Event, EventServiceError> {
        let mut event = self.require_live(id).await?;
        if event.is_cancelled() {
            return Err(EventServiceError::InvalidState(
                "Cancelled events cannot be edited".to_string(),
            ));
        }

        if let Some(title) = input.title {
            event.title = validate_title(&title)?;
        }
        if let Some(description) = input.description {
            event.description = required_text(&description, "Description")
                .map_err(EventServiceError::ValidationError)?;
        }
        if let Some(slug) = input.slug {
            if slug.trim() != event.slug {
                event.slug = self.resolve_slug(Some(&slug), &event.title, Some(id)).await?;
            }
        }
        apply_text(&mut event.category, input.category);
        apply_text(&mut event.location, input.location);
        apply_text(&mut event.meeting_url, input.meeting_url);
        apply_text(&mut event.cover_image, input.cover_image);
        if let Some(is_online) = input.is_online {
            event.is_online = is_online;
        }
        if let Some(starts_at) = input.starts_at {
            event.starts_at = starts_at;
        }
        if input.clear_ends_at {
            event.ends_at = None;
        } else if let Some(ends_at) = input.ends_at {
            event.ends_at = Some(ends_at);
        }
        if input.clear_capacity {
            event.capacity = None;
        } else if let Some(capacity) = input.capacity {
            event.capacity = Some(capacity);
        }
        validate_schedule(&event)?;

        Ok(self
            .repo
            .update(&event)
            .await
            .context("Failed to update event")?)
    }

    pub async fn publish(&self, id: i64) -> Result<Event, EventServiceError> {
        self.transition(id, EventStatus::Published, None).await
    }

    pub async fn unpublish(&self, id: i64) -> Result<Event, EventServiceError> {
        self.transition(id, EventStatus::Draft, None).await
    }

    /// Cancel an event. Cancellation is final; RSVPs are kept for the record.
    pub async fn cancel(
        &self,
        id: i64,
        input: CancelEventInput,
    ) -> Result<Event, EventServiceError> {
        self.transition(id, EventStatus::Cancelled, clean_text(input.reason))
            .await
    }

    async fn transition(
        &self,
        id: i64,
        to: EventStatus,
        reason: Option<String>,
    ) -> Result<Event, EventServiceError> {
        let mut event = self.require_live(id).await?;
        let from = event.status;
        if !from.can_transition_to(to) {
            return Err(EventServiceError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        event.status = to;
        match to {
            EventStatus::Published if event.published_at.is_none() => {
                event.published_at = Some(now);
            }
            EventStatus::Cancelled => {
                event.cancelled_at = Some(now);
                event.cancellation_reason = reason;
            }
            _ => {}
        }

        let updated = self
            .repo
            .update(&event)
            .await
            .context("Failed to change event status")?;
        tracing::info!(event_id = id, %from, %to, "Event status changed");
        Ok(updated)
    }

    pub async fn soft_delete(&self, id: i64) -> Result<(), EventServiceError> {
        let mut event = self.require_live(id).await?;
        event.deleted_at = Some(Utc::now());
        self.repo
            .update(&event)
            .await
            .context("Failed to delete event")?;
        tracing::info!(event_id = id, "Event deleted");
        Ok(())
    }

    /// Undo a soft delete. Restoring a live event is a no-op.
    pub async fn restore(&self, id: i64) -> Result<Event, EventServiceError> {
        let mut event = self.require(id).await?;
        if !event.is_deleted() {
            return Ok(event);
        }
        event.deleted_at = None;
        let restored = self
            .repo
            .update(&event)
            .await
            .context("Failed to restore event")?;
        tracing::info!(event_id = id, "Event restored");
        Ok(restored)
    }

    /// Published and cancelled events that are not deleted.
    ///
    /// `upcoming` defaults to true for the public listing.
    pub async fn list_public(
        &self,
        filter: EventFilter,
        params: &ListParams,
    ) -> Result<PagedResult<EventWithAttendance>, EventServiceError> {
        let filter = EventFilter {
            upcoming: filter.upcoming.or(Some(true)),
            include_deleted: false,
            public_only: true,
            ..filter
        };
        self.list_admin(&filter, params).await
    }

    pub async fn list_admin(
        &self,
        filter: &EventFilter,
        params: &ListParams,
    ) -> Result<PagedResult<EventWithAttendance>, EventServiceError> {
        let (items, total) = self
            .repo
            .list(filter, params, Utc::now())
            .await
            .context("Failed to list events")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn count(&self, filter: &EventFilter) -> Result<i64, EventServiceError> {
        Ok(self
            .repo
            .count(filter, Utc::now())
            .await
            .context("Failed to count events")?)
    }

    pub async fn count_registrations(&self) -> Result<i64, EventServiceError> {
        Ok(self
            .repo
            .count_all_registrations()
            .await
            .context("Failed to count registrations")?)
    }

    pub async fn get_public_by_slug(
        &self,
        slug: &str,
    ) -> Result<EventWithAttendance, EventServiceError> {
        let event = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get event by slug")?
            .filter(Event::is_public)
            .ok_or_else(|| EventServiceError::NotFound(slug.to_string()))?;
        self.with_attendance(event).await
    }

    /// Admin read by id, deleted events included
    pub async fn get_by_id(&self, id: i64) -> Result<EventWithAttendance, EventServiceError> {
        let event = self.require(id).await?;
        self.with_attendance(event).await
    }

    /// RSVP the user to a published event that has not ended yet.
    pub async fn register(
        &self,
        event_id: i64,
        user: &User,
    ) -> Result<EventRegistration, EventServiceError> {
        let event = self
            .require_live(event_id)
            .await
            .and_then(|e| match e.status {
                EventStatus::Draft => Err(EventServiceError::NotFound(event_id.to_string())),
                _ => Ok(e),
            })?;

        if event.is_cancelled() {
            return Err(EventServiceError::InvalidState(
                "Event has been cancelled".to_string(),
            ));
        }
        if !event.accepts_registrations(Utc::now()) {
            return Err(EventServiceError::InvalidState(
                "Event has already ended".to_string(),
            ));
        }

        match self
            .repo
            .register(event_id, user.id)
            .await
            .context("Failed to register for event")?
        {
            RegistrationOutcome::Registered(registration) => {
                tracing::info!(event_id, user_id = user.id, "RSVP registered");
                Ok(registration)
            }
            RegistrationOutcome::AlreadyRegistered => Err(EventServiceError::AlreadyRegistered),
            RegistrationOutcome::Full => {
                // A full event also rejects the insert for existing attendees.
                if self
                    .repo
                    .is_registered(event_id, user.id)
                    .await
                    .context("Failed to check registration")?
                {
                    Err(EventServiceError::AlreadyRegistered)
                } else {
                    Err(EventServiceError::EventFull)
                }
            }
        }
    }

    pub async fn unregister(&self, event_id: i64, user_id: i64) -> Result<(), EventServiceError> {
        self.require_live(event_id).await?;
        let removed = self
            .repo
            .unregister(event_id, user_id)
            .await
            .context("Failed to cancel RSVP")?;
        if !removed {
            return Err(EventServiceError::NotRegistered);
        }
        tracing::info!(event_id, user_id, "RSVP cancelled");
        Ok(())
    }

    pub async fn attendees(&self, event_id: i64) -> Result<Vec<Attendee>, EventServiceError> {
        self.require(event_id).await?;
        Ok(self
            .repo
            .attendees(event_id)
            .await
            .context("Failed to list attendees")?)
    }

    /// Live events the user has RSVPed to, soonest first
    pub async fn registrations_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<EventWithAttendance>, EventServiceError> {
        Ok(self
            .repo
            .events_for_user(user_id)
            .await
            .context("Failed to list user registrations")?)
    }

    pub async fn export_csv(&self, filter: &EventFilter) -> Result<Vec<u8>, EventServiceError> {
        let events = self
            .repo
            .list_all(filter, Utc::now())
            .await
            .context("Failed to load events for export")?;
        let rows: Vec<EventCsvRow> = events.iter().map(EventCsvRow::from).collect();
        Ok(write_csv(&rows)?)
    }

    pub async fn export_attendees_csv(&self, event_id: i64) -> Result<Vec<u8>, EventServiceError> {
        let attendees = self.attendees(event_id).await?;
        let rows: Vec<AttendeeCsvRow> = attendees.iter().map(AttendeeCsvRow::from).collect();
        Ok(write_csv(&rows)?)
    }

    async fn with_attendance(&self, event: Event) -> Result<EventWithAttendance, EventServiceError> {
        let count = self
            .repo
            .count_registrations(event.id)
            .await
            .context("Failed to count registrations")?;
        Ok(EventWithAttendance::new(event, count))
    }

    async fn require(&self, id: i64) -> Result<Event, EventServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get event by ID")?
            .ok_or_else(|| EventServiceError::NotFound(id.to_string()))
    }

    async fn require_live(&self, id: i64) -> Result<Event, EventServiceError> {
        let event = self.require(id).await?;
        if event.is_deleted() {
            return Err(EventServiceError::NotFound(id.to_string()));
        }
        Ok(event)
    }

    async fn resolve_slug(
        &self,
        requested: Option<&str>,
        title: &str,
        exclude_id: Option<i64>,
    ) -> Result<String, EventServiceError> {
        if let Some(requested) = requested.filter(|s| !s.trim().is_empty()) {
            let slug = generate_slug(requested);
            if slug.is_empty() {
                return Err(EventServiceError::ValidationError(format!(
                    "Invalid slug: {}",
                    requested
                )));
            }
            if self
                .repo
                .slug_exists(&slug, exclude_id)
                .await
                .context("Failed to check slug")?
            {
                return Err(EventServiceError::DuplicateSlug(slug));
            }
            return Ok(slug);
        }

        let base = match generate_slug(title) {
            s if s.is_empty() => fallback_slug("event"),
            s => s,
        };
        let repo = self.repo.clone();
        Ok(unique_slug(&base, move |candidate| {
            let repo = repo.clone();
            async move { repo.slug_exists(&candidate, exclude_id).await }
        })
        .await?)
    }
}

fn validate_title(title: &str) -> Result<String, EventServiceError> {
    let title = required_text(title, "Title").map_err(EventServiceError::ValidationError)?;
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(EventServiceError::ValidationError(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title)
}

/// Cross-field checks on a fully assembled event
fn validate_schedule(event: &Event) -> Result<(), EventServiceError> {
    if let Some(ends_at) = event.ends_at {
        if ends_at <= event.starts_at {
            return Err(EventServiceError::ValidationError(
                "End time must be after the start time".to_string(),
            ));
        }
    }
    if let Some(capacity) = event.capacity {
        if capacity <= 0 {
            return Err(EventServiceError::ValidationError(
                "Capacity must be a positive number".to_string(),
            ));
        }
    }
    if !event.is_online && event.location.is_none() {
        return Err(EventServiceError::ValidationError(
            "In-person events need a location".to_string(),
        ));
    }
    Ok(())
}

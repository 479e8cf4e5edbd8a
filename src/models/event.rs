//! Event model
//!
//! Community events with a draft/published/cancelled workflow and member RSVPs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    /// Physical location, optional for online events
    pub location: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    pub meeting_url: Option<String>,
    pub cover_image: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Maximum number of RSVPs, unlimited when absent
    pub capacity: Option<i64>,
    pub organizer_id: i64,
    pub status: EventStatus,
    pub cancellation_reason: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// An event without an end time is over once it has started.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        match self.ends_at {
            Some(ends_at) => ends_at <= now,
            None => self.starts_at <= now,
        }
    }

    /// Published or cancelled, and not deleted
    pub fn is_public(&self) -> bool {
        !self.is_deleted() && self.status != EventStatus::Draft
    }

    /// RSVPs are accepted for published, live events
    pub fn accepts_registrations(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Published && !self.is_deleted() && !self.has_ended(now)
    }
}

/// Event lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Draft,
    Published,
    /// Terminal
    Cancelled,
}

impl EventStatus {
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Draft, EventStatus::Published)
                | (EventStatus::Published, EventStatus::Draft)
                | (EventStatus::Draft, EventStatus::Cancelled)
                | (EventStatus::Published, EventStatus::Cancelled)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Draft => write!(f, "draft"),
            EventStatus::Published => write!(f, "published"),
            EventStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            "cancelled" => Ok(EventStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid event status: {}", s)),
        }
    }
}

/// Event together with its current RSVP count
#[derive(Debug, Clone, Serialize)]
pub struct EventWithAttendance {
    #[serde(flatten)]
    pub event: Event,
    pub attendee_count: i64,
    /// Seats left, when the event has a capacity
    pub spots_left: Option<i64>,
}

impl EventWithAttendance {
    pub fn new(event: Event, attendee_count: i64) -> Self {
        let spots_left = event.capacity.map(|c| (c - attendee_count).max(0));
        Self {
            event,
            attendee_count,
            spots_left,
        }
    }
}

/// A member's RSVP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRegistration {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// RSVP joined with the member's identity, for organisers
#[derive(Debug, Clone, Serialize)]
pub struct Attendee {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventInput {
    pub title: String,
    pub description: String,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    pub meeting_url: Option<String>,
    pub cover_image: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: Option<i64>,
    /// Draft (default) or published
    pub status: Option<EventStatus>,
}

/// Partial update. An empty string clears an optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEventInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub is_online: Option<bool>,
    pub meeting_url: Option<String>,
    pub cover_image: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Removes the end time
    #[serde(default)]
    pub clear_ends_at: bool,
    pub capacity: Option<i64>,
    /// Removes the capacity limit
    #[serde(default)]
    pub clear_capacity: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelEventInput {
    pub reason: Option<String>,
}

/// Filter for event listings and exports
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub category: Option<String>,
    /// Only events that have not ended yet
    pub upcoming: Option<bool>,
    pub q: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    /// Published and cancelled events only
    #[serde(skip)]
    pub public_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn event_at(starts_at: DateTime<Utc>, ends_at: Option<DateTime<Utc>>) -> Event {
        let now = Utc::now();
        Event {
            id: 1,
            slug: "picnic".to_string(),
            title: "Picnic".to_string(),
            description: "Bring food".to_string(),
            category: None,
            location: Some("Parque".to_string()),
            is_online: false,
            meeting_url: None,
            cover_image: None,
            starts_at,
            ends_at,
            capacity: Some(10),
            organizer_id: 1,
            status: EventStatus::Published,
            cancellation_reason: None,
            published_at: Some(now),
            cancelled_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_has_ended() {
        let now = Utc::now();
        let running = event_at(now - Duration::hours(1), Some(now + Duration::hours(1)));
        assert!(!running.has_ended(now));

        let past = event_at(now - Duration::hours(3), Some(now - Duration::hours(1)));
        assert!(past.has_ended(now));

        let started_no_end = event_at(now - Duration::minutes(1), None);
        assert!(started_no_end.has_ended(now));
    }

    #[test]
    fn test_accepts_registrations() {
        let now = Utc::now();
        let mut event = event_at(now + Duration::days(1), None);
        assert!(event.accepts_registrations(now));

        event.status = EventStatus::Draft;
        assert!(!event.accepts_registrations(now));

        event.status = EventStatus::Cancelled;
        assert!(!event.accepts_registrations(now));
        assert!(event.is_public());
    }

    #[test]
    fn test_spots_left() {
        let now = Utc::now();
        let event = event_at(now, None);
        assert_eq!(EventWithAttendance::new(event.clone(), 4).spots_left, Some(6));
        assert_eq!(EventWithAttendance::new(event, 12).spots_left, Some(0));
    }

    #[test]
    fn test_attendance_serializes_flat() {
        let event = event_at(Utc::now(), None);
        let json = serde_json::to_value(EventWithAttendance::new(event, 2)).unwrap();
        assert_eq!(json["slug"], "picnic");
        assert_eq!(json["attendee_count"], 2);
        assert_eq!(json["status"], "published");
    }

    fn any_status() -> impl Strategy<Value = EventStatus> {
        prop_oneof![
            Just(EventStatus::Draft),
            Just(EventStatus::Published),
            Just(EventStatus::Cancelled),
        ]
    }

    proptest! {
        #[test]
        fn cancelled_is_terminal(next in any_status()) {
            prop_assert!(!EventStatus::Cancelled.can_transition_to(next));
        }

        #[test]
        fn no_self_transitions(status in any_status()) {
            prop_assert!(!status.can_transition_to(status));
        }

        #[test]
        fn status_parse_roundtrip(status in any_status()) {
            prop_assert_eq!(EventStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }
}

//! Event repository
//!
//! Events and their RSVPs (`event_registrations`). Listing queries carry the
//! current attendee count as a correlated subquery.

use crate::db::DynDatabasePool;
use crate::models::{
    Attendee, Event, EventFilter, EventRegistration, EventStatus, EventWithAttendance, ListParams,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use super::like_pattern;

/// Result of an RSVP attempt
#[derive(Debug, Clone)]
pub enum RegistrationOutcome {
    Registered(EventRegistration),
    AlreadyRegistered,
    /// Capacity reached
    Full,
}

/// Event repository trait
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, event: &Event) -> Result<Event>;

    /// Lookup by id, soft-deleted events included
    async fn get_by_id(&self, id: i64) -> Result<Option<Event>>;

    /// Lookup by slug, soft-deleted events included
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Event>>;

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Persist every mutable column of the event
    async fn update(&self, event: &Event) -> Result<Event>;

    async fn count(&self, filter: &EventFilter, now: DateTime<Utc>) -> Result<i64>;

    /// Upcoming listings run soonest first, everything else latest first
    async fn list(
        &self,
        filter: &EventFilter,
        params: &ListParams,
        now: DateTime<Utc>,
    ) -> Result<(Vec<EventWithAttendance>, i64)>;

    async fn list_all(
        &self,
        filter: &EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventWithAttendance>>;

    /// Insert an RSVP unless the member is already registered or the event is full
    async fn register(&self, event_id: i64, user_id: i64) -> Result<RegistrationOutcome>;

    /// Remove an RSVP; returns whether one existed
    async fn unregister(&self, event_id: i64, user_id: i64) -> Result<bool>;

    async fn is_registered(&self, event_id: i64, user_id: i64) -> Result<bool>;

    async fn count_registrations(&self, event_id: i64) -> Result<i64>;

    /// Total RSVPs across all events
    async fn count_all_registrations(&self) -> Result<i64>;

    async fn attendees(&self, event_id: i64) -> Result<Vec<Attendee>>;

    /// Events (not deleted) the member registered for, by start time
    async fn events_for_user(&self, user_id: i64) -> Result<Vec<EventWithAttendance>>;
}

/// SQLx-based event repository implementation
pub struct SqlxEventRepository {
    pool: DynDatabasePool,
}

impl SqlxEventRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EventRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl EventRepository for SqlxEventRepository {
    async fn create(&self, event: &Event) -> Result<Event> {
        create_event(self.pool.sqlite(), event).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get event by ID")?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE slug = ?", EVENT_COLUMNS))
            .bind(slug)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get event by slug")?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn slug_exists(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM events WHERE slug = ? AND id != ?")
            .bind(slug)
            .bind(exclude_id.unwrap_or(0))
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to check event slug")?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn update(&self, event: &Event) -> Result<Event> {
        update_event(self.pool.sqlite(), event).await?;
        self.get_by_id(event.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Event not found after update"))
    }

    async fn count(&self, filter: &EventFilter, now: DateTime<Utc>) -> Result<i64> {
        count_events(self.pool.sqlite(), filter, now).await
    }

    async fn list(
        &self,
        filter: &EventFilter,
        params: &ListParams,
        now: DateTime<Utc>,
    ) -> Result<(Vec<EventWithAttendance>, i64)> {
        let pool = self.pool.sqlite();
        let events = select_events(pool, filter, Some(params), now).await?;
        let total = count_events(pool, filter, now).await?;
        Ok((events, total))
    }

    async fn list_all(
        &self,
        filter: &EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventWithAttendance>> {
        select_events(self.pool.sqlite(), filter, None, now).await
    }

    async fn register(&self, event_id: i64, user_id: i64) -> Result<RegistrationOutcome> {
        register_attendee(self.pool.sqlite(), event_id, user_id).await
    }

    async fn unregister(&self, event_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM event_registrations WHERE event_id = ? AND user_id = ?")
            .bind(event_id)
            .bind(user_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to remove event registration")?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_registered(&self, event_id: i64, user_id: i64) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM event_registrations WHERE event_id = ? AND user_id = ?) AS found",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(self.pool.sqlite())
        .await
        .context("Failed to check event registration")?;
        Ok(row.try_get::<i64, _>("found")? != 0)
    }

    async fn count_registrations(&self, event_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM event_registrations WHERE event_id = ?")
            .bind(event_id)
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to count event registrations")?;
        Ok(row.try_get("count")?)
    }

    async fn count_all_registrations(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM event_registrations")
            .fetch_one(self.pool.sqlite())
            .await
            .context("Failed to count event registrations")?;
        Ok(row.try_get("count")?)
    }

    async fn attendees(&self, event_id: i64) -> Result<Vec<Attendee>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id AS user_id, u.name, u.email, r.created_at AS registered_at
            FROM event_registrations r
            INNER JOIN users u ON u.id = r.user_id
            WHERE r.event_id = ?
            ORDER BY r.created_at ASC, r.id ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list event attendees")?;

        rows.iter().map(row_to_attendee).collect()
    }

    async fn events_for_user(&self, user_id: i64) -> Result<Vec<EventWithAttendance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, {}
            FROM events
            INNER JOIN event_registrations mine ON mine.event_id = events.id
            WHERE mine.user_id = ? AND events.deleted_at IS NULL
            ORDER BY events.starts_at ASC
            "#,
            qualified_columns(),
            ATTENDEE_COUNT
        ))
        .bind(user_id)
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list registrations for user")?;

        rows.iter().map(row_to_event_with_attendance).collect()
    }
}

const EVENT_COLUMNS: &str = "id, slug, title, description, category, location, is_online, meeting_url, \
     cover_image, starts_at, ends_at, capacity, organizer_id, status, cancellation_reason, \
     published_at, cancelled_at, deleted_at, created_at, updated_at";

const ATTENDEE_COUNT: &str =
    "(SELECT COUNT(*) FROM event_registrations r WHERE r.event_id = events.id) AS attendee_count";

fn qualified_columns() -> String {
    EVENT_COLUMNS
        .split(',')
        .map(|c| format!("events.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn create_event(pool: &SqlitePool, event: &Event) -> Result<Event> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO events (slug, title, description, category, location, is_online, meeting_url,
                            cover_image, starts_at, ends_at, capacity, organizer_id, status,
                            published_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.slug)
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.category)
    .bind(&event.location)
    .bind(event.is_online)
    .bind(&event.meeting_url)
    .bind(&event.cover_image)
    .bind(event.starts_at)
    .bind(event.ends_at)
    .bind(event.capacity)
    .bind(event.organizer_id)
    .bind(event.status.to_string())
    .bind(event.published_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create event")?;

    Ok(Event {
        id: result.last_insert_rowid(),
        cancellation_reason: None,
        cancelled_at: None,
        deleted_at: None,
        created_at: now,
        updated_at: now,
        ..event.clone()
    })
}

async fn update_event(pool: &SqlitePool, event: &Event) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE events
        SET slug = ?, title = ?, description = ?, category = ?, location = ?, is_online = ?,
            meeting_url = ?, cover_image = ?, starts_at = ?, ends_at = ?, capacity = ?,
            status = ?, cancellation_reason = ?, published_at = ?, cancelled_at = ?,
            deleted_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&event.slug)
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.category)
    .bind(&event.location)
    .bind(event.is_online)
    .bind(&event.meeting_url)
    .bind(&event.cover_image)
    .bind(event.starts_at)
    .bind(event.ends_at)
    .bind(event.capacity)
    .bind(event.status.to_string())
    .bind(&event.cancellation_reason)
    .bind(event.published_at)
    .bind(event.cancelled_at)
    .bind(event.deleted_at)
    .bind(Utc::now())
    .bind(event.id)
    .execute(pool)
    .await
    .context("Failed to update event")?;

    Ok(())
}

async fn register_attendee(
    pool: &SqlitePool,
    event_id: i64,
    user_id: i64,
) -> Result<RegistrationOutcome> {
    let now = Utc::now();

    // Capacity check and insert share one statement.
    let result = sqlx::query(
        r#"
        INSERT INTO event_registrations (event_id, user_id, created_at)
        SELECT ?, ?, ?
        WHERE (SELECT capacity FROM events WHERE id = ?) IS NULL
           OR (SELECT COUNT(*) FROM event_registrations WHERE event_id = ?)
              < (SELECT capacity FROM events WHERE id = ?)
        "#,
    )
    .bind(event_id)
    .bind(user_id)
    .bind(now)
    .bind(event_id)
    .bind(event_id)
    .bind(event_id)
    .execute(pool)
    .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Ok(RegistrationOutcome::Full),
        Ok(done) => Ok(RegistrationOutcome::Registered(EventRegistration {
            id: done.last_insert_rowid(),
            event_id,
            user_id,
            created_at: now,
        })),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Ok(RegistrationOutcome::AlreadyRegistered)
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to register for event")),
    }
}

fn push_event_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EventFilter, now: DateTime<Utc>) {
    qb.push(" WHERE 1 = 1");
    if !filter.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if filter.public_only {
        qb.push(" AND status != ")
            .push_bind(EventStatus::Draft.to_string());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if filter.upcoming == Some(true) {
        qb.push(" AND (starts_at >= ")
            .push_bind(now)
            .push(" OR (ends_at IS NOT NULL AND ends_at > ")
            .push_bind(now)
            .push("))");
    }
    if let Some(category) = filter.category.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND LOWER(category) = ")
            .push_bind(category.trim().to_lowercase());
    }
    if let Some(pattern) = filter.q.as_deref().and_then(like_pattern) {
        qb.push(" AND (LOWER(title) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(description) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(COALESCE(location, '')) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

async fn count_events(pool: &SqlitePool, filter: &EventFilter, now: DateTime<Utc>) -> Result<i64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM events");
    push_event_filter(&mut qb, filter, now);

    let row = qb
        .build()
        .fetch_one(pool)
        .await
        .context("Failed to count events")?;
    Ok(row.try_get("count")?)
}

async fn select_events(
    pool: &SqlitePool,
    filter: &EventFilter,
    params: Option<&ListParams>,
    now: DateTime<Utc>,
) -> Result<Vec<EventWithAttendance>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {}, {} FROM events",
        EVENT_COLUMNS, ATTENDEE_COUNT
    ));
    push_event_filter(&mut qb, filter, now);
    // Public and upcoming listings read chronologically, admin history newest first.
    if filter.public_only || filter.upcoming == Some(true) {
        qb.push(" ORDER BY starts_at ASC, id ASC");
    } else {
        qb.push(" ORDER BY starts_at DESC, id DESC");
    }
    if let Some(params) = params {
        qb.push(" LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());
    }

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("Failed to list events")?;

    rows.iter().map(row_to_event_with_attendance).collect()
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let status_str: String = row.try_get("status")?;
    let status = EventStatus::from_str(&status_str)
        .with_context(|| format!("Invalid event status in database: {}", status_str))?;

    Ok(Event {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        location: row.try_get("location")?,
        is_online: row.try_get("is_online")?,
        meeting_url: row.try_get("meeting_url")?,
        cover_image: row.try_get("cover_image")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        capacity: row.try_get("capacity")?,
        organizer_id: row.try_get("organizer_id")?,
        status,
        cancellation_reason: row.try_get("cancellation_reason")?,
        published_at: row.try_get("published_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_attendee(row: &sqlx::sqlite::SqliteRow) -> Result<Attendee> {
    Ok(Attendee {
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        registered_at: row.try_get("registered_at")?,
    })
}

fn row_to_event_with_attendance(row: &sqlx::sqlite::SqliteRow) -> Result<EventWithAttendance> {
    let event = row_to_event(row)?;
    let attendee_count: i64 = row.try_get("attendee_count")?;
    Ok(EventWithAttendance::new(event, attendee_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};
    use chrono::Duration;

    struct Fixture {
        events: Arc<dyn EventRepository>,
        users: Arc<dyn UserRepository>,
        organizer_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::boxed(pool.clone());
        let organizer = users
            .create(&User::new("org@example.com", "Org".to_string(), None, UserRole::Admin))
            .await
            .unwrap();
        Fixture {
            events: SqlxEventRepository::boxed(pool),
            users,
            organizer_id: organizer.id,
        }
    }

    async fn member(fx: &Fixture, email: &str) -> i64 {
        fx.users
            .create(&User::new(email, "Member".to_string(), None, UserRole::Member))
            .await
            .unwrap()
            .id
    }

    fn event(slug: &str, organizer_id: i64, starts_in: Duration, capacity: Option<i64>) -> Event {
        let now = Utc::now();
        Event {
            id: 0,
            slug: slug.to_string(),
            title: slug.to_string(),
            description: "Encuentro".to_string(),
            category: Some("Networking".to_string()),
            location: Some("Madrid".to_string()),
            is_online: false,
            meeting_url: None,
            cover_image: None,
            starts_at: now + starts_in,
            ends_at: None,
            capacity,
            organizer_id,
            status: EventStatus::Published,
            cancellation_reason: None,
            published_at: Some(now),
            cancelled_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_register_respects_capacity_and_uniqueness() {
        let fx = setup().await;
        let created = fx
            .events
            .create(&event("cena", fx.organizer_id, Duration::days(2), Some(1)))
            .await
            .unwrap();
        let ana = member(&fx, "ana@example.com").await;
        let bea = member(&fx, "bea@example.com").await;

        assert!(matches!(
            fx.events.register(created.id, ana).await.unwrap(),
            RegistrationOutcome::Registered(_)
        ));
        assert!(matches!(
            fx.events.register(created.id, ana).await.unwrap(),
            RegistrationOutcome::AlreadyRegistered | RegistrationOutcome::Full
        ));
        assert!(matches!(
            fx.events.register(created.id, bea).await.unwrap(),
            RegistrationOutcome::Full
        ));
        assert_eq!(fx.events.count_registrations(created.id).await.unwrap(), 1);
        assert!(fx.events.is_registered(created.id, ana).await.unwrap());
        assert!(!fx.events.is_registered(created.id, bea).await.unwrap());

        assert!(fx.events.unregister(created.id, ana).await.unwrap());
        assert!(!fx.events.unregister(created.id, ana).await.unwrap());
        assert!(matches!(
            fx.events.register(created.id, bea).await.unwrap(),
            RegistrationOutcome::Registered(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_without_capacity() {
        let fx = setup().await;
        let created = fx
            .events
            .create(&event("abierto", fx.organizer_id, Duration::days(2), None))
            .await
            .unwrap();
        let ana = member(&fx, "ana@example.com").await;

        fx.events.register(created.id, ana).await.unwrap();
        assert!(matches!(
            fx.events.register(created.id, ana).await.unwrap(),
            RegistrationOutcome::AlreadyRegistered
        ));
    }

    #[tokio::test]
    async fn test_upcoming_filter_and_ordering() {
        let fx = setup().await;
        fx.events
            .create(&event("pasado", fx.organizer_id, -Duration::days(3), None))
            .await
            .unwrap();
        fx.events
            .create(&event("lejano", fx.organizer_id, Duration::days(10), None))
            .await
            .unwrap();
        fx.events
            .create(&event("pronto", fx.organizer_id, Duration::days(1), None))
            .await
            .unwrap();

        let upcoming = EventFilter {
            upcoming: Some(true),
            ..Default::default()
        };
        let now = Utc::now();
        let (items, total) = fx
            .events
            .list(&upcoming, &ListParams::default(), now)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].event.slug, "pronto");
        assert_eq!(items[1].event.slug, "lejano");

        assert_eq!(fx.events.count(&EventFilter::default(), now).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_public_only_hides_drafts() {
        let fx = setup().await;
        let mut draft = event("borrador", fx.organizer_id, Duration::days(1), None);
        draft.status = EventStatus::Draft;
        draft.published_at = None;
        fx.events.create(&draft).await.unwrap();
        let mut cancelled = event("cancelado", fx.organizer_id, Duration::days(1), None);
        cancelled.status = EventStatus::Cancelled;
        fx.events.create(&cancelled).await.unwrap();

        let public = EventFilter {
            public_only: true,
            ..Default::default()
        };
        let items = fx.events.list_all(&public, Utc::now()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].event.slug, "cancelado");
    }

    #[tokio::test]
    async fn test_attendees_and_user_events() {
        let fx = setup().await;
        let created = fx
            .events
            .create(&event("taller", fx.organizer_id, Duration::days(1), None))
            .await
            .unwrap();
        let ana = member(&fx, "ana@example.com").await;
        fx.events.register(created.id, ana).await.unwrap();

        let attendees = fx.events.attendees(created.id).await.unwrap();
        assert_eq!(attendees.len(), 1);
        assert_eq!(attendees[0].email, "ana@example.com");

        let mine = fx.events.events_for_user(ana).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].attendee_count, 1);
        assert_eq!(fx.events.count_all_registrations().await.unwrap(), 1);
    }
}

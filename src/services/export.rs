//! CSV export
//!
//! Every admin listing can be downloaded as CSV. Each entity has a flat row
//! type; collections are joined with `;`.

use crate::models::{Attendee, BlogPost, Business, EventWithAttendance, User};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A serialisable CSV row with a fixed header.
///
/// The header is written explicitly so an empty export still has one.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

/// Serialise rows into a CSV document with a header row
pub fn write_csv<T: CsvRow>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(T::HEADERS)
        .context("Failed to write CSV header")?;
    for row in rows {
        writer.serialize(row).context("Failed to write CSV row")?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e.error()))
}

/// `{prefix}-YYYY-MM-DD.csv` for today's date
pub fn export_filename(prefix: &str) -> String {
    export_filename_at(prefix, Utc::now())
}

fn export_filename_at(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}.csv", prefix, at.format("%Y-%m-%d"))
}

#[derive(Debug, Serialize)]
pub struct UserCsvRow {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub status: String,
    pub google_linked: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CsvRow for UserCsvRow {
    const HEADERS: &'static [&'static str] = &[
        "id",
        "email",
        "name",
        "role",
        "status",
        "google_linked",
        "last_login_at",
        "created_at",
    ];
}

impl From<&User> for UserCsvRow {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.to_string(),
            status: user.status.to_string(),
            google_linked: user.google_id.is_some(),
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlogPostCsvRow {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub status: String,
    pub category: Option<String>,
    pub tags: String,
    pub author_id: i64,
    pub view_count: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CsvRow for BlogPostCsvRow {
    const HEADERS: &'static [&'static str] = &[
        "id",
        "slug",
        "title",
        "status",
        "category",
        "tags",
        "author_id",
        "view_count",
        "published_at",
        "deleted_at",
        "created_at",
    ];
}

impl From<&BlogPost> for BlogPostCsvRow {
    fn from(post: &BlogPost) -> Self {
        Self {
            id: post.id,
            slug: post.slug.clone(),
            title: post.title.clone(),
            status: post.status.to_string(),
            category: post.category.clone(),
            tags: post.tags.join(";"),
            author_id: post.author_id,
            view_count: post.view_count,
            published_at: post.published_at,
            deleted_at: post.deleted_at,
            created_at: post.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventCsvRow {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub status: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub is_online: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: Option<i64>,
    pub attendee_count: i64,
    pub organizer_id: i64,
    pub cancellation_reason: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CsvRow for EventCsvRow {
    const HEADERS: &'static [&'static str] = &[
        "id",
        "slug",
        "title",
        "status",
        "category",
        "location",
        "is_online",
        "starts_at",
        "ends_at",
        "capacity",
        "attendee_count",
        "organizer_id",
        "cancellation_reason",
        "deleted_at",
        "created_at",
    ];
}

impl From<&EventWithAttendance> for EventCsvRow {
    fn from(item: &EventWithAttendance) -> Self {
        let event = &item.event;
        Self {
            id: event.id,
            slug: event.slug.clone(),
            title: event.title.clone(),
            status: event.status.to_string(),
            category: event.category.clone(),
            location: event.location.clone(),
            is_online: event.is_online,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            capacity: event.capacity,
            attendee_count: item.attendee_count,
            organizer_id: event.organizer_id,
            cancellation_reason: event.cancellation_reason.clone(),
            deleted_at: event.deleted_at,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttendeeCsvRow {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
}

impl CsvRow for AttendeeCsvRow {
    const HEADERS: &'static [&'static str] = &["user_id", "name", "email", "registered_at"];
}

impl From<&Attendee> for AttendeeCsvRow {
    fn from(a: &Attendee) -> Self {
        Self {
            user_id: a.user_id,
            name: a.name.clone(),
            email: a.email.clone(),
            registered_at: a.registered_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BusinessCsvRow {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub category: String,
    pub city: Option<String>,
    pub owner_id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub instagram: Option<String>,
    pub is_verified: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CsvRow for BusinessCsvRow {
    const HEADERS: &'static [&'static str] = &[
        "id",
        "slug",
        "name",
        "category",
        "city",
        "owner_id",
        "email",
        "phone",
        "website",
        "instagram",
        "is_verified",
        "deleted_at",
        "created_at",
    ];
}

impl From<&Business> for BusinessCsvRow {
    fn from(b: &Business) -> Self {
        Self {
            id: b.id,
            slug: b.slug.clone(),
            name: b.name.clone(),
            category: b.category.clone(),
            city: b.city.clone(),
            owner_id: b.owner_id,
            email: b.email.clone(),
            phone: b.phone.clone(),
            website: b.website.clone(),
            instagram: b.instagram.clone(),
            is_verified: b.is_verified,
            deleted_at: b.deleted_at,
            created_at: b.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlogPostStatus;
    use chrono::TimeZone;

    fn post(tags: &[&str]) -> BlogPost {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        BlogPost {
            id: 7,
            slug: "hola".to_string(),
            title: "Hola, \"amigas\"".to_string(),
            excerpt: None,
            content: "...".to_string(),
            cover_image: None,
            category: Some("news".to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            author_id: 1,
            status: BlogPostStatus::Published,
            published_at: Some(now),
            view_count: 3,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_export_has_header() {
        let bytes = write_csv::<BlogPostCsvRow>(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("id,slug,title,status"));
    }

    #[test]
    fn test_blog_post_row_joins_tags_and_quotes() {
        let rows = vec![BlogPostCsvRow::from(&post(&["salud", "bienestar"]))];
        let text = String::from_utf8(write_csv(&rows).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("salud;bienestar"));
        assert!(lines[1].contains("\"Hola, \"\"amigas\"\"\""));
        assert!(lines[1].contains("2024-05-01T12:00:00Z"));
    }

    #[test]
    fn test_header_matches_row_width() {
        let rows = vec![BlogPostCsvRow::from(&post(&[]))];
        let bytes = write_csv(&rows).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers().unwrap().len();
        for record in reader.records() {
            assert_eq!(record.unwrap().len(), headers);
        }
    }

    #[test]
    fn test_export_filename() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(export_filename_at("events", at), "events-2024-03-09.csv");
        assert!(export_filename("users").ends_with(".csv"));
    }
}

//! End-to-end tests for the HTTP API, driving the full router in memory.

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use entre_amigas::api::{build_router, AppState};
use entre_amigas::config::Config;
use entre_amigas::db::{create_test_pool, migrations};
use entre_amigas::services::{OAuthError, OAuthProfile, OAuthProvider};

const ADMIN_EMAIL: &str = "admin@example.com";
const ADMIN_PASSWORD: &str = "adminpassword";

struct TestApp {
    server: TestServer,
    state: AppState,
}

async fn spawn_app_with(config: Config) -> TestApp {
    let pool = create_test_pool().await.expect("Failed to create test pool");
    migrations::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let state = AppState::from_config(pool, &config).expect("Failed to build state");
    state
        .user_service
        .ensure_admin(ADMIN_EMAIL, ADMIN_PASSWORD, "Admin")
        .await
        .expect("Failed to create admin");

    let server = TestServer::new(build_router(state.clone(), &config.server.cors_origin))
        .expect("Failed to start test server");
    TestApp { server, state }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = Some("integration-test-secret".to_string());
    config
}

async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

fn bearer(request: TestRequest, token: &str) -> TestRequest {
    request.add_header(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

fn from_ip(request: TestRequest, ip: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_str(ip).unwrap(),
    )
}

impl TestApp {
    async fn register(&self, name: &str, email: &str) -> String {
        let response = self
            .server
            .post("/api/v1/auth/register")
            .json(&json!({ "name": name, "email": email, "password": "password123" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        response.json::<Value>()["token"].as_str().unwrap().to_string()
    }

    async fn admin_token(&self) -> String {
        let response = self
            .server
            .post("/api/v1/auth/admin/login")
            .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        response.json::<Value>()["token"].as_str().unwrap().to_string()
    }

    async fn create_published_event(&self, admin: &str, title: &str, capacity: i64) -> i64 {
        let starts_at = Utc::now() + Duration::days(7);
        let response = bearer(self.server.post("/api/v1/admin/events"), admin)
            .json(&json!({
                "title": title,
                "description": "Monthly meetup",
                "location": "Community hall",
                "starts_at": starts_at,
                "capacity": capacity,
                "status": "published",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        response.json::<Value>()["id"].as_i64().unwrap()
    }
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

// ============================================================================
// Auth
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = spawn_app().await;

    let response = app.server.get("/api/v1/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;
    let token = app.register("Ana", "Ana@Example.com").await;

    let me = bearer(app.server.get("/api/v1/auth/me"), &token).await;
    assert_eq!(me.status_code(), StatusCode::OK);
    let body = me.json::<Value>();
    assert_eq!(body["email"], "ana@example.com");
    assert_eq!(body["role"], "member");
    assert!(body.get("password_hash").is_none());

    let login = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "ana@example.com", "password": "password123" }))
        .await;
    assert_eq!(login.status_code(), StatusCode::OK);
    let cookie = login.header(header::SET_COOKIE);
    assert!(cookie.to_str().unwrap().starts_with("token="));

    let wrong = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "ana@example.com", "password": "wrongpassword" }))
        .await;
    assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&wrong.json::<Value>()), "UNAUTHORIZED");
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = spawn_app().await;
    app.register("Ana", "ana@example.com").await;

    let response = app
        .server
        .post("/api/v1/auth/register")
        .json(&json!({ "name": "Ana", "email": "ANA@example.com", "password": "password123" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_me_requires_token() {
    let app = spawn_app().await;

    let response = app.server.get("/api/v1/auth/me").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let garbage = bearer(app.server.get("/api/v1/auth/me"), "not-a-jwt").await;
    assert_eq!(garbage.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_need_admin_scope() {
    let app = spawn_app().await;
    let member = app.register("Ana", "ana@example.com").await;

    let anonymous = app.server.get("/api/v1/admin/stats").await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

    let as_member = bearer(app.server.get("/api/v1/admin/stats"), &member).await;
    assert_eq!(as_member.status_code(), StatusCode::FORBIDDEN);

    // The admin account's member-scoped token is not enough either
    let member_login = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .await;
    let admin_as_member = member_login.json::<Value>()["token"]
        .as_str()
        .unwrap()
        .to_string();
    let response = bearer(app.server.get("/api/v1/admin/stats"), &admin_as_member).await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let admin = app.admin_token().await;
    let stats = bearer(app.server.get("/api/v1/admin/stats"), &admin).await;
    assert_eq!(stats.status_code(), StatusCode::OK);
    let body = stats.json::<Value>();
    assert_eq!(body["users"]["total"], 2);
    assert_eq!(body["users"]["admins"], 1);
}

#[tokio::test]
async fn test_admin_login_rejects_members() {
    let app = spawn_app().await;
    app.register("Ana", "ana@example.com").await;

    let response = app
        .server
        .post("/api/v1/auth/admin/login")
        .json(&json!({ "email": "ana@example.com", "password": "password123" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_all_revokes_tokens() {
    let app = spawn_app().await;
    let token = app.register("Ana", "ana@example.com").await;

    let response = bearer(app.server.post("/api/v1/auth/logout-all"), &token).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let me = bearer(app.server.get("/api/v1/auth/me"), &token).await;
    assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_suspended_member_is_locked_out() {
    let app = spawn_app().await;
    let member = app.register("Ana", "ana@example.com").await;
    let admin = app.admin_token().await;

    let me = bearer(app.server.get("/api/v1/auth/me"), &member).await;
    let member_id = me.json::<Value>()["id"].as_i64().unwrap();

    let response = bearer(
        app.server
            .put(&format!("/api/v1/admin/users/{}/status", member_id)),
        &admin,
    )
    .json(&json!({ "status": "suspended" }))
    .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let me = bearer(app.server.get("/api/v1/auth/me"), &member).await;
    assert_eq!(me.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(&me.json::<Value>()), "USER_SUSPENDED");
}

#[tokio::test]
async fn test_admin_cannot_suspend_self() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let me = bearer(app.server.get("/api/v1/auth/me"), &admin).await;
    let admin_id = me.json::<Value>()["id"].as_i64().unwrap();

    let response = bearer(
        app.server.put(&format!("/api/v1/admin/users/{}/status", admin_id)),
        &admin,
    )
    .json(&json!({ "status": "suspended" }))
    .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_auth_routes_are_rate_limited_per_ip() {
    let mut config = test_config();
    config.rate_limit.auth_max_requests = 3;
    let app = spawn_app_with(config).await;

    for _ in 0..3 {
        let response = from_ip(app.server.post("/api/v1/auth/login"), "203.0.113.9")
            .json(&json!({ "email": "nobody@example.com", "password": "password123" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    let limited = from_ip(app.server.post("/api/v1/auth/login"), "203.0.113.9")
        .json(&json!({ "email": "nobody@example.com", "password": "password123" }))
        .await;
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited
        .header(header::RETRY_AFTER)
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);
    let body = limited.json::<Value>();
    assert_eq!(error_code(&body), "RATE_LIMITED");
    assert_eq!(body["error"]["details"]["retry_after"], retry_after);

    // Another client is unaffected
    let other = from_ip(app.server.post("/api/v1/auth/login"), "198.51.100.1")
        .json(&json!({ "email": "nobody@example.com", "password": "password123" }))
        .await;
    assert_eq!(other.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_login_locks_after_failures() {
    let mut config = test_config();
    config.rate_limit.admin_login_max_attempts = 2;
    let app = spawn_app_with(config).await;

    // Different IPs, same e-mail
    for ip in ["203.0.113.1", "203.0.113.2"] {
        let response = from_ip(app.server.post("/api/v1/auth/admin/login"), ip)
            .json(&json!({ "email": ADMIN_EMAIL, "password": "wrongpassword" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    let locked = from_ip(app.server.post("/api/v1/auth/admin/login"), "203.0.113.3")
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .await;
    assert_eq!(locked.status_code(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_signed_in_auth_routes_share_the_ip_limit() {
    let mut config = test_config();
    config.rate_limit.auth_max_requests = 4;
    let app = spawn_app_with(config).await;

    let register = from_ip(app.server.post("/api/v1/auth/register"), "203.0.113.20")
        .json(&json!({ "name": "Ana", "email": "ana@example.com", "password": "password123" }))
        .await;
    assert_eq!(register.status_code(), StatusCode::CREATED);
    let token = register.json::<Value>()["token"].as_str().unwrap().to_string();

    let guess = || {
        bearer(
            from_ip(app.server.put("/api/v1/auth/password"), "203.0.113.20"),
            &token,
        )
        .json(&json!({ "current_password": "wrongpassword", "new_password": "newpassword123" }))
    };
    for _ in 0..3 {
        assert_eq!(guess().await.status_code(), StatusCode::UNAUTHORIZED);
    }
    let limited = guess().await;
    assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&limited.json::<Value>()), "RATE_LIMITED");
}

// ============================================================================
// Google sign-in
// ============================================================================

struct FakeGoogle;

#[async_trait]
impl OAuthProvider for FakeGoogle {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://accounts.example.com/auth?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthProfile, OAuthError> {
        if code != "good-code" {
            return Err(OAuthError::Exchange("bad code".to_string()));
        }
        Ok(OAuthProfile {
            provider_id: "google-sub-1".to_string(),
            email: "lucia@example.com".to_string(),
            email_verified: true,
            name: Some("Lucía".to_string()),
            avatar_url: None,
        })
    }
}

#[tokio::test]
async fn test_google_not_configured() {
    let app = spawn_app().await;

    let response = app.server.get("/api/v1/auth/google").await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(&response.json::<Value>()), "NOT_CONFIGURED");
}

#[tokio::test]
async fn test_google_round_trip() {
    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();
    let config = test_config();
    let mut state = AppState::from_config(pool, &config).unwrap();
    state.oauth_provider = Some(Arc::new(FakeGoogle));
    let server = TestServer::new(build_router(state, &config.server.cors_origin)).unwrap();

    let start = server.get("/api/v1/auth/google").await;
    assert_eq!(start.status_code(), StatusCode::SEE_OTHER);
    let location = start.header(header::LOCATION).to_str().unwrap().to_string();
    let oauth_state = location.split("state=").nth(1).unwrap().to_string();

    let callback = server
        .get(&format!(
            "/api/v1/auth/google/callback?code=good-code&state={}",
            oauth_state
        ))
        .await;
    assert_eq!(callback.status_code(), StatusCode::SEE_OTHER);
    let target = callback.header(header::LOCATION).to_str().unwrap().to_string();
    assert!(target.starts_with("http://localhost:3000/auth/callback?token="));

    // The state is single-use
    let replay = server
        .get(&format!(
            "/api/v1/auth/google/callback?code=good-code&state={}",
            oauth_state
        ))
        .await;
    let target = replay.header(header::LOCATION).to_str().unwrap().to_string();
    assert_eq!(target, "http://localhost:3000/login?error=oauth_failed");
}

// ============================================================================
// Blog posts
// ============================================================================

#[tokio::test]
async fn test_post_workflow_and_soft_delete() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    let created = bearer(app.server.post("/api/v1/admin/posts"), &admin)
        .json(&json!({
            "title": "Welcome to Entre Amigas",
            "content": "Hello everyone",
            "tags": ["news", "News", "community"],
        }))
        .await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let post = created.json::<Value>();
    let id = post["id"].as_i64().unwrap();
    assert_eq!(post["slug"], "welcome-to-entre-amigas");
    assert_eq!(post["status"], "draft");
    assert_eq!(post["tags"], json!(["news", "community"]));

    let hidden = app.server.get("/api/v1/posts/welcome-to-entre-amigas").await;
    assert_eq!(hidden.status_code(), StatusCode::NOT_FOUND);

    let published = bearer(
        app.server.post(&format!("/api/v1/admin/posts/{}/publish", id)),
        &admin,
    )
    .await;
    assert_eq!(published.status_code(), StatusCode::OK);
    assert!(published.json::<Value>()["published_at"].is_string());

    let again = bearer(
        app.server.post(&format!("/api/v1/admin/posts/{}/publish", id)),
        &admin,
    )
    .await;
    assert_eq!(again.status_code(), StatusCode::CONFLICT);
    assert_eq!(error_code(&again.json::<Value>()), "INVALID_STATE");

    let public = app.server.get("/api/v1/posts/welcome-to-entre-amigas").await;
    assert_eq!(public.status_code(), StatusCode::OK);
    let list = app.server.get("/api/v1/posts").await.json::<Value>();
    assert_eq!(list["total"], 1);

    let deleted = bearer(
        app.server.delete(&format!("/api/v1/admin/posts/{}", id)),
        &admin,
    )
    .await;
    assert_eq!(deleted.status_code(), StatusCode::OK);
    let gone = app.server.get("/api/v1/posts/welcome-to-entre-amigas").await;
    assert_eq!(gone.status_code(), StatusCode::NOT_FOUND);
    let list = app.server.get("/api/v1/posts").await.json::<Value>();
    assert_eq!(list["total"], 0);

    let restored = bearer(
        app.server.post(&format!("/api/v1/admin/posts/{}/restore", id)),
        &admin,
    )
    .await;
    assert_eq!(restored.status_code(), StatusCode::OK);
    let back = app.server.get("/api/v1/posts/welcome-to-entre-amigas").await;
    assert_eq!(back.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_duplicate_post_slugs_get_suffixes() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    let mut slugs = Vec::new();
    for _ in 0..2 {
        let response = bearer(app.server.post("/api/v1/admin/posts"), &admin)
            .json(&json!({ "title": "Book Club", "content": "Monthly picks" }))
            .await;
        slugs.push(response.json::<Value>()["slug"].as_str().unwrap().to_string());
    }
    assert_eq!(slugs, ["book-club", "book-club-2"]);

    let explicit = bearer(app.server.post("/api/v1/admin/posts"), &admin)
        .json(&json!({ "title": "Other", "content": "x", "slug": "book-club" }))
        .await;
    assert_eq!(explicit.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_post_is_rejected() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    let response = bearer(app.server.post("/api/v1/admin/posts"), &admin)
        .json(&json!({ "title": "   ", "content": "x" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response.json::<Value>()), "VALIDATION_ERROR");
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_rsvp_respects_capacity() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let ana = app.register("Ana", "ana@example.com").await;
    let bea = app.register("Bea", "bea@example.com").await;

    let event_id = app.create_published_event(&admin, "Tapas Night", 1).await;
    let rsvp = format!("/api/v1/events/{}/rsvp", event_id);

    let first = bearer(app.server.post(&rsvp), &ana).await;
    assert_eq!(first.status_code(), StatusCode::CREATED);

    let twice = bearer(app.server.post(&rsvp), &ana).await;
    assert_eq!(twice.status_code(), StatusCode::CONFLICT);
    assert!(twice.json::<Value>()["error"]["details"].is_null());

    let full = bearer(app.server.post(&rsvp), &bea).await;
    assert_eq!(full.status_code(), StatusCode::CONFLICT);
    assert_eq!(full.json::<Value>()["error"]["details"]["reason"], "full");

    let detail = app.server.get("/api/v1/events/tapas-night").await;
    let body = detail.json::<Value>();
    assert_eq!(body["attendee_count"], 1);
    assert_eq!(body["spots_left"], 0);

    let cancelled = bearer(app.server.delete(&rsvp), &ana).await;
    assert_eq!(cancelled.status_code(), StatusCode::OK);
    let not_registered = bearer(app.server.delete(&rsvp), &ana).await;
    assert_eq!(not_registered.status_code(), StatusCode::NOT_FOUND);

    let second_try = bearer(app.server.post(&rsvp), &bea).await;
    assert_eq!(second_try.status_code(), StatusCode::CREATED);

    let mine = bearer(app.server.get("/api/v1/me/events"), &bea).await;
    let mine = mine.json::<Value>();
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["slug"], "tapas-night");
}

#[tokio::test]
async fn test_public_event_listing_is_chronological() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;

    for (title, days) in [("Later Meetup", 5), ("Sooner Meetup", 1)] {
        let response = bearer(app.server.post("/api/v1/admin/events"), &admin)
            .json(&json!({
                "title": title,
                "description": "Monthly meetup",
                "location": "Community hall",
                "starts_at": Utc::now() + Duration::days(days),
                "status": "published",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
    }

    for path in ["/api/v1/events", "/api/v1/events?upcoming=false"] {
        let body = app.server.get(path).await.json::<Value>();
        let slugs: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["slug"].as_str().unwrap())
            .collect();
        assert_eq!(slugs, ["sooner-meetup", "later-meetup"], "{}", path);
    }
}

#[tokio::test]
async fn test_rsvp_requires_login() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let event_id = app.create_published_event(&admin, "Picnic", 10).await;

    let response = app
        .server
        .post(&format!("/api/v1/events/{}/rsvp", event_id))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cancelled_event_refuses_rsvps() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let ana = app.register("Ana", "ana@example.com").await;
    let event_id = app.create_published_event(&admin, "Hike", 10).await;

    let cancelled = bearer(
        app.server
            .post(&format!("/api/v1/admin/events/{}/cancel", event_id)),
        &admin,
    )
    .json(&json!({ "reason": "Storm warning" }))
    .await;
    assert_eq!(cancelled.status_code(), StatusCode::OK);
    let body = cancelled.json::<Value>();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancellation_reason"], "Storm warning");

    let rsvp = bearer(
        app.server.post(&format!("/api/v1/events/{}/rsvp", event_id)),
        &ana,
    )
    .await;
    assert_eq!(rsvp.status_code(), StatusCode::CONFLICT);
    assert_eq!(error_code(&rsvp.json::<Value>()), "INVALID_STATE");
}

#[tokio::test]
async fn test_attendee_export_is_csv() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let ana = app.register("Ana", "ana@example.com").await;
    let event_id = app.create_published_event(&admin, "Brunch", 5).await;
    bearer(
        app.server.post(&format!("/api/v1/events/{}/rsvp", event_id)),
        &ana,
    )
    .await;

    let response = bearer(
        app.server
            .get(&format!("/api/v1/admin/events/{}/attendees/export", event_id)),
        &admin,
    )
    .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let disposition = response.header(header::CONTENT_DISPOSITION);
    assert!(disposition
        .to_str()
        .unwrap()
        .contains(&format!("event-{}-attendees-", event_id)));
    let text = response.text();
    assert!(text.lines().nth(1).unwrap().contains("ana@example.com"));
}

// ============================================================================
// Businesses
// ============================================================================

#[tokio::test]
async fn test_business_ownership() {
    let app = spawn_app().await;
    let ana = app.register("Ana", "ana@example.com").await;
    let bea = app.register("Bea", "bea@example.com").await;
    let admin = app.admin_token().await;

    let created = bearer(app.server.post("/api/v1/businesses"), &ana)
        .json(&json!({
            "name": "Café Amigas",
            "description": "Coffee and cake",
            "category": "Food",
            "website": "cafe-amigas.example",
            "instagram": "@cafeamigas",
        }))
        .await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let business = created.json::<Value>();
    let id = business["id"].as_i64().unwrap();
    assert_eq!(business["website"], "https://cafe-amigas.example");
    assert_eq!(business["instagram"], "cafeamigas");

    let path = format!("/api/v1/businesses/{}", id);
    let stranger = bearer(app.server.put(&path), &bea)
        .json(&json!({ "name": "Hijacked" }))
        .await;
    assert_eq!(stranger.status_code(), StatusCode::FORBIDDEN);

    let owner = bearer(app.server.put(&path), &ana)
        .json(&json!({ "city": "Lisboa" }))
        .await;
    assert_eq!(owner.status_code(), StatusCode::OK);
    assert_eq!(owner.json::<Value>()["city"], "Lisboa");

    let mine = bearer(app.server.get("/api/v1/me/businesses"), &ana).await;
    assert_eq!(mine.json::<Value>().as_array().unwrap().len(), 1);

    let verified = bearer(
        app.server
            .put(&format!("/api/v1/admin/businesses/{}/verify", id)),
        &admin,
    )
    .json(&json!({ "verified": true }))
    .await;
    assert_eq!(verified.status_code(), StatusCode::OK);

    let categories = app.server.get("/api/v1/businesses/categories").await;
    assert_eq!(
        categories.json::<Value>(),
        json!([{ "category": "Food", "count": 1 }])
    );

    let admin_delete = bearer(app.server.delete(&path), &admin).await;
    assert_eq!(admin_delete.status_code(), StatusCode::OK);
    let gone = app
        .server
        .get(&format!(
            "/api/v1/businesses/{}",
            business["slug"].as_str().unwrap()
        ))
        .await;
    assert_eq!(gone.status_code(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Admin exports
// ============================================================================

#[tokio::test]
async fn test_user_export_headers() {
    let app = spawn_app().await;
    app.register("Ana", "ana@example.com").await;
    let admin = app.admin_token().await;

    let response = bearer(app.server.get("/api/v1/admin/users/export"), &admin).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.header(header::CONTENT_TYPE).to_str().unwrap(),
        "text/csv; charset=utf-8"
    );
    let disposition = response.header(header::CONTENT_DISPOSITION);
    let disposition = disposition.to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"users-"));
    assert!(disposition.ends_with(".csv\""));

    let text = response.text();
    assert_eq!(text.lines().count(), 3);
    assert!(text.starts_with("id,email,name,role,status"));
}

#[tokio::test]
async fn test_unknown_route_uses_error_envelope() {
    let app = spawn_app().await;
    let response = app.server.get("/api/v1/nope").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&response.json::<Value>()), "NOT_FOUND");
    assert!(app.state.request_stats.total_requests() >= 1);
}

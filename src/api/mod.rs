//! API layer - HTTP handlers and routing
//!
//! All endpoints live under `/api/v1`:
//! - Health check
//! - Auth (password, admin and Google sign-in, profile)
//! - Blog posts
//! - Events and RSVPs
//! - Business directory
//! - Admin dashboard, user moderation and CSV exports

pub mod admin;
pub mod auth;
pub mod blog_posts;
pub mod businesses;
pub mod common;
pub mod events;
pub mod health;
pub mod middleware;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthSettings, AuthenticatedUser, RequestStats};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (admin login + admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .nest("/admin/posts", blog_posts::admin_router())
        .nest("/admin/events", events::admin_router())
        .nest("/admin/businesses", businesses::admin_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    // Protected routes (any signed-in member)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router(state.clone()))
        .nest("/events", events::member_router())
        .nest("/businesses", businesses::member_router())
        .route("/me/events", get(events::my_events))
        .route("/me/businesses", get(businesses::my_businesses))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth::public_router(state))
        .nest("/posts", blog_posts::public_router())
        .nest("/events", events::public_router())
        .nest("/businesses", businesses::public_router())
        .merge(admin_routes)
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    // Cookie auth needs credentials, which rules out a wildcard origin.
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => tracing::warn!(%cors_origin, "Invalid CORS origin, cross-origin requests disabled"),
    }

    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{create_test_pool, migrations};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app(cors_origin: &str) -> Router {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let state = AppState::from_config(pool, &Config::default()).expect("Failed to build state");
        build_router(state, cors_origin)
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_frontend_with_credentials() {
        let app = app("http://localhost:3000").await;

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/auth/me")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_invalid_cors_origin_still_serves() {
        let app = app("not a valid\norigin").await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_not_found() {
        let app = app("http://localhost:3000").await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

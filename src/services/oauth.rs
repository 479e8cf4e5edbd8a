//! Google sign-in
//!
//! Authorization-code flow against Google's OAuth 2.0 endpoints:
//! 1. `authorize_url` sends the member to Google's consent page with a
//!    one-shot `state` value kept in `OAuthStateStore`.
//! 2. The callback hands the `code` to `exchange_code`, which trades it for an
//!    access token and fetches the OpenID profile.

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GoogleConfig;

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPES: &str = "openid email profile";

/// How long a consent round-trip may take
pub const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Identity returned by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    /// Stable account id at the provider (`sub`)
    pub provider_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// OAuth errors
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Google sign-in is not configured")]
    NotConfigured,
    #[error("Invalid or expired OAuth state")]
    InvalidState,
    #[error("OAuth exchange failed: {0}")]
    Exchange(String),
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Exchange(e.to_string())
    }
}

/// An OAuth identity provider
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Consent page URL carrying `state`
    fn authorize_url(&self, state: &str) -> String;

    /// Trade an authorization code for the user's profile
    async fn exchange_code(&self, code: &str) -> Result<OAuthProfile, OAuthError>;
}

/// Google implementation of `OAuthProvider`
pub struct GoogleOAuthProvider {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleOAuthProvider {
    pub fn new(client_id: String, client_secret: String, redirect_url: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("entre-amigas")
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client_id,
            client_secret,
            redirect_url,
            http,
        }
    }

    /// Build the provider when all three settings are present.
    pub fn from_config(config: &GoogleConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        Some(Self::new(
            config.client_id.clone()?,
            config.client_secret.clone()?,
            config.redirect_url.clone()?,
        ))
    }

    /// Form-encoded POST that trades `code` for an access token
    fn token_request(&self, code: &str) -> reqwest::RequestBuilder {
        self.http.post(GOOGLE_TOKEN_ENDPOINT).form(&[
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ])
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuthProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&prompt=select_account",
            GOOGLE_AUTH_ENDPOINT,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(GOOGLE_SCOPES),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthProfile, OAuthError> {
        let response = self.token_request(code).send().await?;

        if !response.status().is_success() {
            return Err(OAuthError::Exchange(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;

        let response = self
            .http
            .get(GOOGLE_USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OAuthError::Exchange(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }
        let info: GoogleUserInfo = response.json().await?;

        let email = info
            .email
            .ok_or_else(|| OAuthError::Exchange("Google profile has no e-mail".to_string()))?;

        Ok(OAuthProfile {
            provider_id: info.sub,
            email,
            email_verified: info.email_verified,
            name: info.name,
            avatar_url: info.picture,
        })
    }
}

/// One-shot CSRF `state` values for in-flight consent round-trips
#[derive(Clone)]
pub struct OAuthStateStore {
    states: Cache<String, ()>,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Create and remember a new state value
    pub async fn issue(&self) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        self.states.insert(state.clone(), ()).await;
        state
    }

    /// Accept a state value once
    pub async fn consume(&self, state: &str) -> Result<(), OAuthError> {
        // `contains_key` honours the TTL, `remove` makes it single-use.
        if self.states.contains_key(state) && self.states.remove(state).await.is_some() {
            Ok(())
        } else {
            Err(OAuthError::InvalidState)
        }
    }
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::new(OAUTH_STATE_TTL)
    }
}

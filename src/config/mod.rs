//! Configuration management
//!
//! This module handles loading and parsing configuration for Entre Amigas.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Development-only signing secret, used when no `jwt_secret` is configured
/// in a debug build.
pub const DEV_JWT_SECRET: &str = "entre-amigas-dev-secret-change-me";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Google OAuth client configuration
    #[serde(default)]
    pub google: GoogleConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the frontend)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL (`:memory:` for an in-memory database)
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/entre_amigas.db".to_string()
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing JWTs
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Lifetime of member tokens
    #[serde(default = "default_user_token_ttl_hours")]
    pub user_token_ttl_hours: i64,
    /// Lifetime of admin tokens
    #[serde(default = "default_admin_token_ttl_hours")]
    pub admin_token_ttl_hours: i64,
    /// Frontend base URL, target of OAuth redirects
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Mark auth cookies `Secure`
    #[serde(default)]
    pub cookie_secure: bool,
    /// Administrator created (or promoted) at startup
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            user_token_ttl_hours: default_user_token_ttl_hours(),
            admin_token_ttl_hours: default_admin_token_ttl_hours(),
            frontend_url: default_frontend_url(),
            cookie_secure: false,
            bootstrap_admin: None,
        }
    }
}

fn default_user_token_ttl_hours() -> i64 {
    7 * 24
}

fn default_admin_token_ttl_hours() -> i64 {
    8
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

/// Administrator account ensured at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    #[serde(default = "default_admin_name")]
    pub name: String,
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

/// Google OAuth client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Must match the redirect URI registered with Google
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl GoogleConfig {
    /// Google sign-in is enabled only when all three values are present
    pub fn is_configured(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.redirect_url]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// Rate limiting configuration for the authentication routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window for any `/auth` route, per client IP
    #[serde(default = "default_auth_max_requests")]
    pub auth_max_requests: u32,
    #[serde(default = "default_auth_window_secs")]
    pub auth_window_secs: u64,
    /// Member password login attempts per window, per client IP
    #[serde(default = "default_login_max_attempts")]
    pub login_max_attempts: u32,
    /// Admin login attempts per window, per client IP and per e-mail
    #[serde(default = "default_admin_login_max_attempts")]
    pub admin_login_max_attempts: u32,
    #[serde(default = "default_login_window_secs")]
    pub login_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_max_requests: default_auth_max_requests(),
            auth_window_secs: default_auth_window_secs(),
            login_max_attempts: default_login_max_attempts(),
            admin_login_max_attempts: default_admin_login_max_attempts(),
            login_window_secs: default_login_window_secs(),
        }
    }
}

fn default_auth_max_requests() -> u32 {
    100
}

fn default_auth_window_secs() -> u64 {
    15 * 60
}

fn default_login_max_attempts() -> u32 {
    10
}

fn default_admin_login_max_attempts() -> u32 {
    5
}

fn default_login_window_secs() -> u64 {
    15 * 60
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `ENTRE_AMIGAS_<SECTION>_<KEY>`:
    /// - ENTRE_AMIGAS_SERVER_HOST / _PORT / _CORS_ORIGIN
    /// - ENTRE_AMIGAS_DATABASE_URL
    /// - ENTRE_AMIGAS_AUTH_JWT_SECRET / _FRONTEND_URL / _COOKIE_SECURE
    /// - ENTRE_AMIGAS_AUTH_USER_TOKEN_TTL_HOURS / _ADMIN_TOKEN_TTL_HOURS
    /// - ENTRE_AMIGAS_AUTH_ADMIN_EMAIL / _ADMIN_PASSWORD / _ADMIN_NAME
    /// - ENTRE_AMIGAS_GOOGLE_CLIENT_ID / _CLIENT_SECRET / _REDIRECT_URL
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.user_token_ttl_hours <= 0 || self.auth.admin_token_ttl_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if let Some(admin) = &self.auth.bootstrap_admin {
            if !admin.email.contains('@') {
                return Err(ConfigError::ValidationError(format!(
                    "bootstrap admin e-mail is invalid: {}",
                    admin.email
                )));
            }
            if admin.password.len() < 8 {
                return Err(ConfigError::ValidationError(
                    "bootstrap admin password must be at least 8 characters".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the JWT signing secret.
    ///
    /// Release builds refuse to start without one; debug builds fall back to
    /// [`DEV_JWT_SECRET`].
    pub fn jwt_secret(&self) -> Result<String, ConfigError> {
        match self.auth.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
            _ if cfg!(debug_assertions) => {
                tracing::warn!("auth.jwt_secret is not set, using the development secret");
                Ok(DEV_JWT_SECRET.to_string())
            }
            _ => Err(ConfigError::ValidationError(
                "auth.jwt_secret must be set".to_string(),
            )),
        }
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(host) = std::env::var("ENTRE_AMIGAS_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("ENTRE_AMIGAS_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("ENTRE_AMIGAS_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        // Database
        if let Ok(url) = std::env::var("ENTRE_AMIGAS_DATABASE_URL") {
            self.database.url = url;
        }

        // Auth
        if let Ok(secret) = std::env::var("ENTRE_AMIGAS_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Ok(ttl) = std::env::var("ENTRE_AMIGAS_AUTH_USER_TOKEN_TTL_HOURS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.user_token_ttl_hours = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("ENTRE_AMIGAS_AUTH_ADMIN_TOKEN_TTL_HOURS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.admin_token_ttl_hours = ttl;
            }
        }
        if let Ok(url) = std::env::var("ENTRE_AMIGAS_AUTH_FRONTEND_URL") {
            self.auth.frontend_url = url;
        }
        if let Ok(secure) = std::env::var("ENTRE_AMIGAS_AUTH_COOKIE_SECURE") {
            match secure.to_lowercase().as_str() {
                "true" | "1" => self.auth.cookie_secure = true,
                "false" | "0" => self.auth.cookie_secure = false,
                _ => {} // Ignore invalid values
            }
        }
        if let (Ok(email), Ok(password)) = (
            std::env::var("ENTRE_AMIGAS_AUTH_ADMIN_EMAIL"),
            std::env::var("ENTRE_AMIGAS_AUTH_ADMIN_PASSWORD"),
        ) {
            let name = std::env::var("ENTRE_AMIGAS_AUTH_ADMIN_NAME")
                .unwrap_or_else(|_| default_admin_name());
            self.auth.bootstrap_admin = Some(BootstrapAdmin { email, password, name });
        }

        // Google
        if let Ok(client_id) = std::env::var("ENTRE_AMIGAS_GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(client_id);
        }
        if let Ok(client_secret) = std::env::var("ENTRE_AMIGAS_GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(client_secret);
        }
        if let Ok(redirect_url) = std::env::var("ENTRE_AMIGAS_GOOGLE_REDIRECT_URL") {
            self.google.redirect_url = Some(redirect_url);
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches the process environment.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_KEYS: &[&str] = &[
        "ENTRE_AMIGAS_SERVER_HOST",
        "ENTRE_AMIGAS_SERVER_PORT",
        "ENTRE_AMIGAS_SERVER_CORS_ORIGIN",
        "ENTRE_AMIGAS_DATABASE_URL",
        "ENTRE_AMIGAS_AUTH_JWT_SECRET",
        "ENTRE_AMIGAS_AUTH_USER_TOKEN_TTL_HOURS",
        "ENTRE_AMIGAS_AUTH_ADMIN_TOKEN_TTL_HOURS",
        "ENTRE_AMIGAS_AUTH_FRONTEND_URL",
        "ENTRE_AMIGAS_AUTH_COOKIE_SECURE",
        "ENTRE_AMIGAS_AUTH_ADMIN_EMAIL",
        "ENTRE_AMIGAS_AUTH_ADMIN_PASSWORD",
        "ENTRE_AMIGAS_AUTH_ADMIN_NAME",
        "ENTRE_AMIGAS_GOOGLE_CLIENT_ID",
        "ENTRE_AMIGAS_GOOGLE_CLIENT_SECRET",
        "ENTRE_AMIGAS_GOOGLE_REDIRECT_URL",
    ];

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        let guard = super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
        guard
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::path::Path::new("nonexistent_config.yml");
        let config = Config::load(path).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "data/entre_amigas.db");
        assert_eq!(config.auth.user_token_ttl_hours, 168);
        assert_eq!(config.auth.admin_token_ttl_hours, 8);
        assert!(config.auth.bootstrap_admin.is_none());
        assert!(!config.google.is_configured());
        assert_eq!(config.rate_limit.admin_login_max_attempts, 5);
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.auth_max_requests, 100);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 3001\nauth:\n  admin_token_ttl_hours: 2\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.admin_token_ttl_hours, 2);
        assert_eq!(config.auth.user_token_ttl_hours, 168);
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 9000
  cors_origin: "https://entreamigas.example"
database:
  url: "/var/lib/entre_amigas/app.db"
auth:
  jwt_secret: "s3cret"
  frontend_url: "https://entreamigas.example"
  cookie_secure: true
  bootstrap_admin:
    email: "admin@entreamigas.example"
    password: "changeme123"
google:
  client_id: "id"
  client_secret: "secret"
  redirect_url: "https://api.entreamigas.example/api/v1/auth/google/callback"
rate_limit:
  login_max_attempts: 3
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url, "/var/lib/entre_amigas/app.db");
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert!(config.auth.cookie_secure);
        let admin = config.auth.bootstrap_admin.clone().unwrap();
        assert_eq!(admin.email, "admin@entreamigas.example");
        assert_eq!(admin.name, "Administrator");
        assert!(config.google.is_configured());
        assert_eq!(config.rate_limit.login_max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_validate_rejects_short_admin_password() {
        let mut config = Config::default();
        config.auth.bootstrap_admin = Some(BootstrapAdmin {
            email: "admin@example.com".to_string(),
            password: "short".to_string(),
            name: "Admin".to_string(),
        });
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_google_partially_configured_is_disabled() {
        let google = GoogleConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("  ".to_string()),
            redirect_url: Some("http://localhost/cb".to_string()),
        };
        assert!(!google.is_configured());
    }

    #[test]
    fn test_jwt_secret_from_config() {
        let mut config = Config::default();
        config.auth.jwt_secret = Some(" abc ".to_string());
        assert_eq!(config.jwt_secret().unwrap(), "abc");
    }

    #[test]
    fn test_env_override_server_and_auth() {
        let _guard = lock_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 8080\n").unwrap();

        std::env::set_var("ENTRE_AMIGAS_SERVER_PORT", "4000");
        std::env::set_var("ENTRE_AMIGAS_AUTH_JWT_SECRET", "from-env");
        std::env::set_var("ENTRE_AMIGAS_AUTH_COOKIE_SECURE", "true");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("from-env"));
        assert!(config.auth.cookie_secure);

        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_env_override_bootstrap_admin_needs_both_values() {
        let _guard = lock_env();

        std::env::set_var("ENTRE_AMIGAS_AUTH_ADMIN_EMAIL", "root@example.com");
        let config = Config::load_with_env(std::path::Path::new("missing.yml")).unwrap();
        assert!(config.auth.bootstrap_admin.is_none());

        std::env::set_var("ENTRE_AMIGAS_AUTH_ADMIN_PASSWORD", "password123");
        let config = Config::load_with_env(std::path::Path::new("missing.yml")).unwrap();
        let admin = config.auth.bootstrap_admin.unwrap();
        assert_eq!(admin.email, "root@example.com");
        assert_eq!(admin.name, "Administrator");

        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _guard = lock_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 8080\n").unwrap();

        std::env::set_var("ENTRE_AMIGAS_SERVER_PORT", "not_a_number");
        std::env::set_var("ENTRE_AMIGAS_AUTH_COOKIE_SECURE", "maybe");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(!config.auth.cookie_secure);

        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }
}

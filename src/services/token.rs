//! Session tokens (JWT)
//!
//! Tokens are HS256 JWTs. Member logins get a `user` scope token and admin
//! logins an `admin` scope token with a much shorter lifetime. The `ver` claim
//! carries the user's token version so that bumping it revokes every token
//! issued before.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{User, UserRole};

/// Which login issued a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    User,
    Admin,
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenScope::User => write!(f, "user"),
            TokenScope::Admin => write!(f, "admin"),
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub email: String,
    pub role: UserRole,
    pub scope: TokenScope,
    /// Token version of the user at issue time
    pub ver: i64,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Cookie `Max-Age`
    pub max_age_secs: i64,
}

/// Token errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Issues and verifies JWTs
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    user_ttl: Duration,
    admin_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, user_ttl_hours: i64, admin_ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            user_ttl: Duration::hours(user_ttl_hours),
            admin_ttl: Duration::hours(admin_ttl_hours),
        }
    }

    pub fn ttl(&self, scope: TokenScope) -> Duration {
        match scope {
            TokenScope::User => self.user_ttl,
            TokenScope::Admin => self.admin_ttl,
        }
    }

    /// Sign a token for `user` in the given scope.
    pub fn issue(&self, user: &User, scope: TokenScope) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let ttl = self.ttl(scope);
        let expires_at = now + ttl;

        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            scope,
            ver: user.token_version,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        Ok(IssuedToken {
            token: self.sign(&claims)?,
            expires_at,
            max_age_secs: ttl.num_seconds(),
        })
    }

    /// Check signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

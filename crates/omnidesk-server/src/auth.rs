//! Password hashing and bearer token issuance.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use omnidesk_core::AppConfig;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_STAFF: &str = "staff";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing material plus the token lifetime.
#[derive(Clone)]
pub struct AuthState {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    ttl_hours: i64,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("keys", &"[redacted]")
            .field("ttl_hours", &self.ttl_hours)
            .finish()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            ttl_hours: ttl_hours.max(1),
        }
    }

    /// Builds the signing keys from `JWT_SECRET`.
    ///
    /// An empty secret is tolerated in development (with a warning) and
    /// rejected everywhere else.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret is empty outside development.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if config.jwt_secret.trim().is_empty() {
            if config.is_development() {
                tracing::warn!("JWT_SECRET is empty; tokens are signed with an empty key");
            } else {
                anyhow::bail!("JWT_SECRET must be set outside development");
            }
        }
        Ok(Self::new(&config.jwt_secret, config.jwt_ttl_hours))
    }

    /// Signs a token for the given user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Token`] if encoding fails.
    pub fn issue_token(&self, user_id: i64, email: &str, role: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            role: role.to_owned(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.ttl_hours)).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Checks signature and expiry and returns the claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Token`] for a malformed, tampered or expired token.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// Hashes a password with Argon2id and a random salt.
///
/// # Errors
///
/// Returns [`AuthError::Hash`] if the salt or hash cannot be produced.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Returns `false` for a wrong password and for an unparsable stored hash.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

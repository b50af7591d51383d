//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! models in `synthgen_api` (which use camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role given to self-registered principals.
pub const DEFAULT_ROLE: &str = "user";

/// Subscription tier given to self-registered principals.
pub const DEFAULT_TIER: &str = "free";

/// A user account as seen by the credential engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    /// Normalized (trimmed, lower-case) email.
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub tier: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a principal.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub tier: String,
}

/// Which slot a session token may be used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims embedded in session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: principal ID.
    pub sub: String,
    pub email: String,
    pub role: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Issued at (unix milliseconds); orders tokens against subject-wide
    /// revocation within the same second.
    pub iat_ms: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
}

/// Subject facts copied into every token issued for a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl From<&Principal> for Subject {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            email: p.email.clone(),
            role: p.role.clone(),
        }
    }
}

impl From<&SessionClaims> for Subject {
    fn from(c: &SessionClaims) -> Self {
        Self {
            id: c.sub.clone(),
            email: c.email.clone(),
            role: c.role.clone(),
        }
    }
}

/// Access + refresh pair returned by sign-in.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub subject: Subject,
}

/// Access token returned by refresh.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
}

/// What a one-time token may be spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneTimePurpose {
    PasswordReset,
    EmailVerify,
}

impl OneTimePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OneTimePurpose::PasswordReset => "password_reset",
            OneTimePurpose::EmailVerify => "email_verify",
        }
    }
}

/// Stored one-time token. `token_hash` is the SHA-256 of the raw value.
#[derive(Debug, Clone)]
pub struct OneTimeTokenRecord {
    pub token_hash: String,
    pub purpose: OneTimePurpose,
    pub subject_email: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

/// API key record; the raw secret is never part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of issuing an API key. `raw_secret` is shown once.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key_id: String,
    pub raw_secret: String,
    pub record: ApiKeyRecord,
}

//! Credential lifecycle engine.
//!
//! Password hashing, session tokens, revocation, brute-force mitigation,
//! one-time tokens and API keys. [`session::SessionService`] composes them
//! into the operations request handlers call.

pub mod api_keys;
pub mod attempts;
pub mod events;
pub mod jwt;
pub mod lockout;
pub mod one_time;
pub mod password;
pub mod pg;
pub mod principals;
pub mod queries;
pub mod rate_limit;
pub mod revocation;
pub mod session;
pub mod stores;
pub mod sweeper;

use std::future::Future;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Authentication errors.
///
/// Variants keep the precise reason for logs; the HTTP layer collapses
/// the token variants into a single "unauthorized" answer.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked, retry after {retry_after_secs}s")]
    AccountLocked { retry_after_secs: u64 },

    #[error("Too many attempts, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token malformed")]
    TokenMalformed,

    #[error("Wrong token type")]
    TokenWrongType,

    #[error("One-time token invalid")]
    OneTimeTokenInvalid,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store operation timed out")]
    StoreTimeout,

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for every reason a presented session token was refused.
    pub fn is_token_failure(&self) -> bool {
        matches!(
            self,
            AuthError::TokenExpired
                | AuthError::TokenRevoked
                | AuthError::TokenMalformed
                | AuthError::TokenWrongType
                | AuthError::Unauthorized
        )
    }
}

/// Run a store call under a deadline. Elapsing is a failure, never "absent".
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(AuthError::StoreTimeout)
        }
    }
}

/// SHA-256 hex digest used as a storage key for tokens and identifiers.
pub fn fingerprint(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_sha256_hex() {
        let a = fingerprint("eyJhbGciOiJIUzI1NiJ9.payload.sig");
        let b = fingerprint("eyJhbGciOiJIUzI1NiJ9.payload.sig");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint("other"));
    }

    #[test]
    fn token_failures_are_grouped() {
        assert!(AuthError::TokenExpired.is_token_failure());
        assert!(AuthError::TokenWrongType.is_token_failure());
        assert!(!AuthError::InvalidCredentials.is_token_failure());
        assert!(!AuthError::StoreTimeout.is_token_failure());
    }

    #[tokio::test]
    async fn bounded_turns_elapsed_deadline_into_timeout() {
        let result: Result<(), AuthError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::StoreTimeout)));
    }

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, AuthError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}

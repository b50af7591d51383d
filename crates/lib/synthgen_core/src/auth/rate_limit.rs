//! Per-client sign-in throttling.
//!
//! Counts failed sign-ins per client address across all accounts. The counter
//! only lapses with its window; a successful sign-in does not reset it.

use super::AuthError;
use super::attempts::AttemptTracker;

/// Fails sign-ins from a client once it has too many recent failures.
#[derive(Clone)]
pub struct RateLimiter {
    attempts: AttemptTracker,
    max_failures: u32,
}

impl RateLimiter {
    pub fn new(attempts: AttemptTracker, max_failures: u32) -> Self {
        Self {
            attempts,
            max_failures,
        }
    }

    /// Fail with [`AuthError::RateLimited`] if `client` is over the limit.
    pub async fn check(&self, client: &str) -> Result<(), AuthError> {
        let Some(record) = self.attempts.current(client).await? else {
            return Ok(());
        };
        if record.failure_count < self.max_failures {
            return Ok(());
        }
        let now = self.attempts.clock().now();
        let retry_after_secs = (record.window_end(self.attempts.window()) - now)
            .num_seconds()
            .max(1) as u64;
        tracing::warn!(
            client_hash = %self.attempts.key(client),
            failures = record.failure_count,
            "sign-in rate limited"
        );
        Err(AuthError::RateLimited { retry_after_secs })
    }

    pub async fn record_failure(&self, client: &str) -> Result<(), AuthError> {
        self.attempts.record_failure(client).await.map(|_| ())
    }
}

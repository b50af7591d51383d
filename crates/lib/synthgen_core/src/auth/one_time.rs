//! Single-use tokens for password reset and email verification.
//!
//! Tokens are opaque random values; the server keeps a record keyed by the
//! token's SHA-256 and consumes it on first successful verification.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use tracing::debug;

use super::sweeper::Sweep;
use super::{AuthError, bounded, fingerprint};
use crate::clock::Clock;
use crate::models::auth::{OneTimePurpose, OneTimeTokenRecord};

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Backend for one-time token records.
#[async_trait]
pub trait OneTimeTokenStore: Send + Sync {
    async fn insert(&self, record: OneTimeTokenRecord) -> Result<(), AuthError>;

    /// Mark the record consumed and return its email, in one atomic step,
    /// if it exists, matches `purpose`, is unconsumed and has not expired.
    /// Every other caller racing on the same record gets `None`.
    async fn consume(
        &self,
        token_hash: &str,
        purpose: OneTimePurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AuthError>;
}

/// In-memory one-time token store. Consumed records stay until expiry.
#[derive(Debug, Default)]
pub struct InMemoryOneTimeTokenStore {
    records: DashMap<String, OneTimeTokenRecord>,
}

impl InMemoryOneTimeTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl OneTimeTokenStore for InMemoryOneTimeTokenStore {
    async fn insert(&self, record: OneTimeTokenRecord) -> Result<(), AuthError> {
        self.records.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &str,
        purpose: OneTimePurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AuthError> {
        // The shard write lock held by `get_mut` makes check-and-set atomic.
        let Some(mut record) = self.records.get_mut(token_hash) else {
            return Ok(None);
        };
        if record.consumed || record.purpose != purpose || record.expires_at <= now {
            return Ok(None);
        }
        record.consumed = true;
        Ok(Some(record.subject_email.clone()))
    }
}

impl Sweep for InMemoryOneTimeTokenStore {
    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.expires_at > now);
        before.saturating_sub(self.records.len())
    }

    fn name(&self) -> &'static str {
        "one_time_tokens"
    }
}

/// Generate a URL-safe random token value.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues and spends one-time tokens.
#[derive(Clone)]
pub struct OneTimeTokenService {
    store: Arc<dyn OneTimeTokenStore>,
    clock: Arc<dyn Clock>,
    timeout: StdDuration,
}

impl OneTimeTokenService {
    pub fn new(
        store: Arc<dyn OneTimeTokenStore>,
        clock: Arc<dyn Clock>,
        timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// Create a token for `subject_email` valid for `ttl`. The raw value is
    /// returned and not kept.
    pub async fn generate(
        &self,
        purpose: OneTimePurpose,
        subject_email: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let value = generate_token_value();
        let record = OneTimeTokenRecord {
            token_hash: fingerprint(&value),
            purpose,
            subject_email: subject_email.to_string(),
            expires_at: self.clock.now() + ttl,
            consumed: false,
        };
        bounded(self.timeout, self.store.insert(record)).await?;
        debug!(purpose = purpose.as_str(), "one-time token issued");
        Ok(value)
    }

    /// Spend a token, returning its email. Unknown, expired, consumed and
    /// wrong-purpose tokens all fail with [`AuthError::OneTimeTokenInvalid`].
    pub async fn verify(&self, purpose: OneTimePurpose, value: &str) -> Result<String, AuthError> {
        let hash = fingerprint(value);
        let consumed = bounded(
            self.timeout,
            self.store.consume(&hash, purpose, self.clock.now()),
        )
        .await?;
        consumed.ok_or_else(|| {
            debug!(purpose = purpose.as_str(), "one-time token rejected");
            AuthError::OneTimeTokenInvalid
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn service() -> (OneTimeTokenService, Arc<InMemoryOneTimeTokenStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryOneTimeTokenStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let svc = OneTimeTokenService::new(store.clone(), clock.clone(), StdDuration::from_secs(1));
        (svc, store, clock)
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let (svc, _, _) = service();
        let token = svc
            .generate(OneTimePurpose::PasswordReset, "bob@example.com", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            svc.verify(OneTimePurpose::PasswordReset, &token).await.unwrap(),
            "bob@example.com"
        );
        assert!(matches!(
            svc.verify(OneTimePurpose::PasswordReset, &token).await,
            Err(AuthError::OneTimeTokenInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_token_fails() {
        let (svc, _, clock) = service();
        let token = svc
            .generate(OneTimePurpose::EmailVerify, "a@example.com", Duration::hours(24))
            .await
            .unwrap();
        clock.advance(Duration::hours(24));
        assert!(matches!(
            svc.verify(OneTimePurpose::EmailVerify, &token).await,
            Err(AuthError::OneTimeTokenInvalid)
        ));
    }

    #[tokio::test]
    async fn wrong_purpose_fails_without_consuming() {
        let (svc, _, _) = service();
        let token = svc
            .generate(OneTimePurpose::EmailVerify, "a@example.com", Duration::hours(1))
            .await
            .unwrap();
        assert!(matches!(
            svc.verify(OneTimePurpose::PasswordReset, &token).await,
            Err(AuthError::OneTimeTokenInvalid)
        ));
        assert!(svc.verify(OneTimePurpose::EmailVerify, &token).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_token_fails() {
        let (svc, _, _) = service();
        assert!(matches!(
            svc.verify(OneTimePurpose::PasswordReset, "nope").await,
            Err(AuthError::OneTimeTokenInvalid)
        ));
    }

    #[tokio::test]
    async fn raw_value_is_not_stored() {
        let (svc, store, _) = service();
        let token = svc
            .generate(OneTimePurpose::PasswordReset, "a@example.com", Duration::hours(1))
            .await
            .unwrap();
        assert!(store.records.get(&token).is_none());
        assert!(store.records.get(&fingerprint(&token)).is_some());
    }

    #[test]
    fn generated_values_are_url_safe_and_distinct() {
        let a = generate_token_value();
        let b = generate_token_value();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_verification_succeeds_exactly_once() {
        let (svc, _, _) = service();
        let token = svc
            .generate(OneTimePurpose::PasswordReset, "bob@example.com", Duration::hours(1))
            .await
            .unwrap();
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let svc = svc.clone();
                let token = token.clone();
                tokio::spawn(async move { svc.verify(OneTimePurpose::PasswordReset, &token).await })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;
        let successes = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn sweep_keeps_live_records() {
        let (svc, store, clock) = service();
        svc.generate(OneTimePurpose::PasswordReset, "a@example.com", Duration::hours(1))
            .await
            .unwrap();
        svc.generate(OneTimePurpose::EmailVerify, "a@example.com", Duration::hours(24))
            .await
            .unwrap();
        clock.advance(Duration::hours(2));
        assert_eq!(store.purge_expired(clock.now()), 1);
        assert_eq!(store.len(), 1);
    }
}

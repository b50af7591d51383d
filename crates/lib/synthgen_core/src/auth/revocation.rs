//! Token revocation (blacklist).
//!
//! Revoked tokens are stored by fingerprint until just past the token's
//! own expiry, so the set never outgrows the live tokens.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use super::sweeper::Sweep;
use super::{AuthError, bounded, fingerprint};
use crate::clock::Clock;
use crate::models::auth::SessionClaims;

/// Backend for revocation entries.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record a revoked token fingerprint until `expires_at`.
    async fn insert(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Whether an unexpired entry exists for `fingerprint`.
    async fn contains(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<bool, AuthError>;

    /// Revoke every token of `subject_id` issued before `revoked_at`.
    async fn revoke_subject(
        &self,
        subject_id: &str,
        revoked_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError>;

    /// Latest subject-wide revocation instant, if still in force.
    async fn subject_revoked_at(
        &self,
        subject_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuthError>;
}

#[derive(Debug, Clone, Copy)]
struct SubjectRevocation {
    revoked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// In-memory revocation store with passive expiry.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    tokens: DashMap<String, DateTime<Utc>>,
    subjects: DashMap<String, SubjectRevocation>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.tokens.len() + self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn insert(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        self.tokens
            .entry(fingerprint.to_string())
            .and_modify(|e| *e = (*e).max(expires_at))
            .or_insert(expires_at);
        Ok(())
    }

    async fn contains(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<bool, AuthError> {
        Ok(self
            .tokens
            .get(fingerprint)
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn revoke_subject(
        &self,
        subject_id: &str,
        revoked_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let fresh = SubjectRevocation {
            revoked_at,
            expires_at,
        };
        self.subjects
            .entry(subject_id.to_string())
            .and_modify(|e| {
                e.revoked_at = e.revoked_at.max(revoked_at);
                e.expires_at = e.expires_at.max(expires_at);
            })
            .or_insert(fresh);
        Ok(())
    }

    async fn subject_revoked_at(
        &self,
        subject_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuthError> {
        Ok(self
            .subjects
            .get(subject_id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.revoked_at))
    }
}

impl Sweep for InMemoryRevocationStore {
    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.len();
        self.tokens.retain(|_, expires_at| *expires_at > now);
        self.subjects.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.len())
    }

    fn name(&self) -> &'static str {
        "revocation"
    }
}

/// Revocation operations over a [`RevocationStore`].
#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    timeout: StdDuration,
}

impl RevocationList {
    pub fn new(store: Arc<dyn RevocationStore>, clock: Arc<dyn Clock>, timeout: StdDuration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// Revoke `token` until `expires_at`. A deadline already passed is a no-op.
    pub async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        if expires_at <= self.clock.now() {
            return Ok(());
        }
        let key = fingerprint(token);
        bounded(self.timeout, self.store.insert(&key, expires_at)).await?;
        debug!(fingerprint = %key, "token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        let key = fingerprint(token);
        bounded(self.timeout, self.store.contains(&key, self.clock.now())).await
    }

    /// Revoke every token issued to `subject_id` up to now. `max_ttl` must be
    /// the longest lifetime any such token can have.
    pub async fn revoke_subject(&self, subject_id: &str, max_ttl: Duration) -> Result<(), AuthError> {
        let now = self.clock.now();
        bounded(
            self.timeout,
            self.store.revoke_subject(subject_id, now, now + max_ttl),
        )
        .await?;
        info!(user_id = %subject_id, "all sessions revoked");
        Ok(())
    }

    /// Fail with [`AuthError::TokenRevoked`] if `token` (with its decoded
    /// `claims`) was revoked individually or subject-wide.
    pub async fn ensure_live(&self, token: &str, claims: &SessionClaims) -> Result<(), AuthError> {
        if self.is_revoked(token).await? {
            return Err(AuthError::TokenRevoked);
        }
        let since = bounded(
            self.timeout,
            self.store.subject_revoked_at(&claims.sub, self.clock.now()),
        )
        .await?;
        if let Some(revoked_at) = since
            && claims.iat_ms < revoked_at.timestamp_millis()
        {
            return Err(AuthError::TokenRevoked);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::auth::TokenType;

    fn list() -> (RevocationList, Arc<InMemoryRevocationStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryRevocationStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let list = RevocationList::new(store.clone(), clock.clone(), StdDuration::from_secs(1));
        (list, store, clock)
    }

    fn claims(sub: &str, issued_at: DateTime<Utc>) -> SessionClaims {
        SessionClaims {
            sub: sub.into(),
            email: "a@example.com".into(),
            role: "user".into(),
            token_type: TokenType::Access,
            iat: issued_at.timestamp(),
            iat_ms: issued_at.timestamp_millis(),
            exp: issued_at.timestamp() + 900,
            jti: "j".into(),
        }
    }

    #[tokio::test]
    async fn revoked_token_is_reported_until_its_expiry() {
        let (list, _, clock) = list();
        list.revoke("tok-a", clock.now() + Duration::minutes(10))
            .await
            .unwrap();
        assert!(list.is_revoked("tok-a").await.unwrap());
        assert!(!list.is_revoked("tok-b").await.unwrap());

        clock.advance(Duration::minutes(10));
        assert!(!list.is_revoked("tok-a").await.unwrap());
    }

    #[tokio::test]
    async fn spent_lifetime_stores_nothing() {
        let (list, store, clock) = list();
        list.revoke("tok", clock.now()).await.unwrap();
        list.revoke("tok", clock.now() - Duration::seconds(5))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_entries() {
        let (list, store, clock) = list();
        list.revoke("short", clock.now() + Duration::minutes(1))
            .await
            .unwrap();
        list.revoke("long", clock.now() + Duration::minutes(30))
            .await
            .unwrap();
        clock.advance(Duration::minutes(2));
        assert_eq!(store.purge_expired(clock.now()), 1);
        assert_eq!(store.len(), 1);
        assert!(list.is_revoked("long").await.unwrap());
    }

    #[tokio::test]
    async fn subject_revocation_covers_earlier_tokens_only() {
        let (list, _, clock) = list();
        let before = claims("u-1", clock.now());
        clock.advance(Duration::seconds(5));
        list.revoke_subject("u-1", Duration::days(7)).await.unwrap();
        clock.advance(Duration::seconds(1));
        let after = claims("u-1", clock.now());
        let other = claims("u-2", clock.now() - Duration::seconds(6));

        assert!(matches!(
            list.ensure_live("t1", &before).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(list.ensure_live("t2", &after).await.is_ok());
        assert!(list.ensure_live("t3", &other).await.is_ok());
    }

    #[tokio::test]
    async fn ensure_live_reports_individually_revoked_token() {
        let (list, _, clock) = list();
        let c = claims("u-1", clock.now());
        list.revoke("tok", clock.now() + Duration::minutes(15))
            .await
            .unwrap();
        assert!(matches!(
            list.ensure_live("tok", &c).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn subject_revocation_splits_within_one_second() {
        let (list, _, clock) = list();
        let second = clock.now().timestamp();
        clock.set(DateTime::from_timestamp(second + 1, 200_000_000).unwrap());
        let early = claims("u-1", clock.now());
        clock.advance(Duration::milliseconds(500));
        list.revoke_subject("u-1", Duration::days(7)).await.unwrap();
        clock.advance(Duration::milliseconds(100));
        let late = claims("u-1", clock.now());

        assert_eq!(early.iat, late.iat);
        assert!(matches!(
            list.ensure_live("t1", &early).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(list.ensure_live("t2", &late).await.is_ok());
    }
}

//! Account lockout after repeated sign-in failures.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use super::attempts::AttemptTracker;
use super::sweeper::Sweep;
use super::{AuthError, bounded};

/// Lockout thresholds.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    /// Failures within the attempt window that trigger a lock.
    pub max_failures: u32,
    /// How long a lock lasts.
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lock_duration: Duration::minutes(15),
        }
    }
}

/// Backend for lock records.
#[async_trait]
pub trait LockoutStore: Send + Sync {
    async fn lock(&self, key: &str, until: DateTime<Utc>) -> Result<(), AuthError>;

    /// `locked_until` if the lock is still in force. A lapsed lock is
    /// removed as part of the read.
    async fn locked_until(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuthError>;

    async fn unlock(&self, key: &str) -> Result<(), AuthError>;
}

/// In-memory lock records.
#[derive(Debug, Default)]
pub struct InMemoryLockoutStore {
    locks: DashMap<String, DateTime<Utc>>,
}

impl InMemoryLockoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl LockoutStore for InMemoryLockoutStore {
    async fn lock(&self, key: &str, until: DateTime<Utc>) -> Result<(), AuthError> {
        self.locks
            .entry(key.to_string())
            .and_modify(|e| *e = (*e).max(until))
            .or_insert(until);
        Ok(())
    }

    async fn locked_until(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuthError> {
        if self.locks.remove_if(key, |_, until| *until <= now).is_some() {
            return Ok(None);
        }
        Ok(self.locks.get(key).map(|until| *until))
    }

    async fn unlock(&self, key: &str) -> Result<(), AuthError> {
        self.locks.remove(key);
        Ok(())
    }
}

impl Sweep for InMemoryLockoutStore {
    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, until| *until > now);
        before.saturating_sub(self.locks.len())
    }

    fn name(&self) -> &'static str {
        "lockout"
    }
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    /// Still below the threshold; `remaining` failures before a lock.
    Open { remaining: u32 },
    Locked { until: DateTime<Utc> },
}

/// Turns accumulated failures into timed locks.
#[derive(Clone)]
pub struct LockoutManager {
    attempts: AttemptTracker,
    store: Arc<dyn LockoutStore>,
    policy: LockoutPolicy,
    timeout: StdDuration,
}

impl LockoutManager {
    pub fn new(
        attempts: AttemptTracker,
        store: Arc<dyn LockoutStore>,
        policy: LockoutPolicy,
        timeout: StdDuration,
    ) -> Self {
        Self {
            attempts,
            store,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Whether `identifier` is locked right now.
    pub async fn is_locked(&self, identifier: &str) -> Result<bool, AuthError> {
        Ok(self.locked_until(identifier).await?.is_some())
    }

    pub async fn locked_until(&self, identifier: &str) -> Result<Option<DateTime<Utc>>, AuthError> {
        let key = self.attempts.key(identifier);
        let now = self.attempts.clock().now();
        bounded(self.timeout, self.store.locked_until(&key, now)).await
    }

    /// Fail with [`AuthError::AccountLocked`] while a lock is in force.
    pub async fn ensure_unlocked(&self, identifier: &str) -> Result<(), AuthError> {
        if let Some(until) = self.locked_until(identifier).await? {
            let now = self.attempts.clock().now();
            let retry_after_secs = (until - now).num_seconds().max(1) as u64;
            return Err(AuthError::AccountLocked { retry_after_secs });
        }
        Ok(())
    }

    /// Count a failure; lock once the threshold is reached. Placing a lock
    /// clears the counter so the next window starts fresh.
    pub async fn record_failure(&self, identifier: &str) -> Result<LockoutStatus, AuthError> {
        let record = self.attempts.record_failure(identifier).await?;
        if record.failure_count < self.policy.max_failures {
            return Ok(LockoutStatus::Open {
                remaining: self.policy.max_failures - record.failure_count,
            });
        }

        let key = self.attempts.key(identifier);
        let until = self.attempts.clock().now() + self.policy.lock_duration;
        bounded(self.timeout, self.store.lock(&key, until)).await?;
        self.attempts.clear(identifier).await?;
        warn!(
            identifier_hash = %key,
            failures = record.failure_count,
            lock_secs = self.policy.lock_duration.num_seconds(),
            "account locked after repeated failures"
        );
        Ok(LockoutStatus::Locked { until })
    }

    /// Forget failures after a successful authentication.
    pub async fn record_success(&self, identifier: &str) -> Result<(), AuthError> {
        self.attempts.clear(identifier).await
    }

    /// Lift a lock and its counter (password reset).
    pub async fn reset(&self, identifier: &str) -> Result<(), AuthError> {
        let key = self.attempts.key(identifier);
        bounded(self.timeout, self.store.unlock(&key)).await?;
        self.attempts.clear(identifier).await?;
        info!(identifier_hash = %key, "lockout reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::attempts::InMemoryAttemptStore;
    use crate::clock::ManualClock;

    fn manager() -> (LockoutManager, Arc<InMemoryLockoutStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let attempts = AttemptTracker::new(
            "lockout",
            Arc::new(InMemoryAttemptStore::new()),
            clock.clone(),
            Duration::minutes(15),
            StdDuration::from_secs(1),
        );
        let store = Arc::new(InMemoryLockoutStore::new());
        let manager = LockoutManager::new(
            attempts,
            store.clone(),
            LockoutPolicy::default(),
            StdDuration::from_secs(1),
        );
        (manager, store, clock)
    }

    #[tokio::test]
    async fn locks_on_threshold() {
        let (m, _, _) = manager();
        for expected in (1..=4).rev() {
            assert_eq!(
                m.record_failure("bob").await.unwrap(),
                LockoutStatus::Open {
                    remaining: expected
                }
            );
            assert!(!m.is_locked("bob").await.unwrap());
        }
        assert!(matches!(
            m.record_failure("bob").await.unwrap(),
            LockoutStatus::Locked { .. }
        ));
        assert!(m.is_locked("bob").await.unwrap());
        assert!(!m.is_locked("carol").await.unwrap());
    }

    #[tokio::test]
    async fn lock_auto_clears_after_duration() {
        let (m, store, clock) = manager();
        for _ in 0..5 {
            m.record_failure("bob").await.unwrap();
        }
        clock.advance(Duration::minutes(14));
        match m.ensure_unlocked("bob").await {
            Err(AuthError::AccountLocked { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 60)
            }
            other => panic!("expected lock, got {other:?}"),
        }
        clock.advance(Duration::minutes(1));
        assert!(!m.is_locked("bob").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn lock_starts_a_fresh_window() {
        let (m, _, clock) = manager();
        for _ in 0..5 {
            m.record_failure("bob").await.unwrap();
        }
        clock.advance(Duration::minutes(16));
        assert_eq!(
            m.record_failure("bob").await.unwrap(),
            LockoutStatus::Open { remaining: 4 }
        );
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let (m, _, _) = manager();
        for _ in 0..4 {
            m.record_failure("bob").await.unwrap();
        }
        m.record_success("bob").await.unwrap();
        for _ in 0..4 {
            m.record_failure("bob").await.unwrap();
        }
        assert!(!m.is_locked("bob").await.unwrap());
    }

    #[tokio::test]
    async fn reset_lifts_lock() {
        let (m, _, _) = manager();
        for _ in 0..5 {
            m.record_failure("bob").await.unwrap();
        }
        assert!(m.is_locked("bob").await.unwrap());
        m.reset("bob").await.unwrap();
        assert!(!m.is_locked("bob").await.unwrap());
        assert_eq!(
            m.record_failure("bob").await.unwrap(),
            LockoutStatus::Open { remaining: 4 }
        );
    }
}

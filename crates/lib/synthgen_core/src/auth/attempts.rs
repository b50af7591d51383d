//! Failure counting per identifier within a fixed window.
//!
//! The first failure opens the window; once it lapses the next failure opens
//! a new one. Shared by the lockout manager and the rate limiter.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::sweeper::Sweep;
use super::{AuthError, bounded, fingerprint};
use crate::clock::Clock;

/// Failures counted in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub window_start: DateTime<Utc>,
    pub failure_count: u32,
}

impl AttemptRecord {
    pub fn window_end(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + window
    }
}

/// Backend for attempt counters.
///
/// `record_failure` must be an atomic read-modify-write per key: concurrent
/// callers for one key never lose an increment.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Count one failure and return the record after the increment.
    async fn record_failure(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptRecord, AuthError>;

    /// Current record, or `None` if absent or its window has lapsed.
    async fn current(&self, key: &str, now: DateTime<Utc>) -> Result<Option<AttemptRecord>, AuthError>;

    async fn clear(&self, key: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Copy)]
struct StoredAttempt {
    record: AttemptRecord,
    expires_at: DateTime<Utc>,
}

/// In-memory attempt store; increments happen under the map's entry lock.
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    records: DashMap<String, StoredAttempt>,
}

impl InMemoryAttemptStore {
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
impl AttemptStore for InMemoryAttemptStore {
    async fn record_failure(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<AttemptRecord, AuthError> {
        let fresh = StoredAttempt {
            record: AttemptRecord {
                window_start: now,
                failure_count: 0,
            },
            expires_at: now + window,
        };
        let mut entry = self.records.entry(key.to_string()).or_insert(fresh);
        if entry.expires_at <= now {
            *entry = fresh;
        }
        entry.record.failure_count = entry.record.failure_count.saturating_add(1);
        Ok(entry.record)
    }

    async fn current(&self, key: &str, now: DateTime<Utc>) -> Result<Option<AttemptRecord>, AuthError> {
        Ok(self
            .records
            .get(key)
            .filter(|s| s.expires_at > now)
            .map(|s| s.record))
    }

    async fn clear(&self, key: &str) -> Result<(), AuthError> {
        self.records.remove(key);
        Ok(())
    }
}

impl Sweep for InMemoryAttemptStore {
    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, s| s.expires_at > now);
        before.saturating_sub(self.records.len())
    }

    fn name(&self) -> &'static str {
        "attempts"
    }
}

/// Windowed failure counter for one namespace of identifiers.
///
/// Identifiers are stored as `namespace:sha256(identifier)`.
#[derive(Clone)]
pub struct AttemptTracker {
    namespace: &'static str,
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    timeout: StdDuration,
}

impl AttemptTracker {
    pub fn new(
        namespace: &'static str,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
        timeout: StdDuration,
    ) -> Self {
        Self {
            namespace,
            store,
            clock,
            window,
            timeout,
        }
    }

    /// Storage key for `identifier`; also what gets logged in its place.
    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.namespace, fingerprint(identifier))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn record_failure(&self, identifier: &str) -> Result<AttemptRecord, AuthError> {
        let key = self.key(identifier);
        bounded(
            self.timeout,
            self.store.record_failure(&key, self.clock.now(), self.window),
        )
        .await
    }

    pub async fn current(&self, identifier: &str) -> Result<Option<AttemptRecord>, AuthError> {
        let key = self.key(identifier);
        bounded(self.timeout, self.store.current(&key, self.clock.now())).await
    }

    /// Failures in the current window.
    pub async fn count(&self, identifier: &str) -> Result<u32, AuthError> {
        Ok(self
            .current(identifier)
            .await?
            .map_or(0, |r| r.failure_count))
    }

    pub async fn clear(&self, identifier: &str) -> Result<(), AuthError> {
        let key = self.key(identifier);
        bounded(self.timeout, self.store.clear(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (AttemptTracker, Arc<InMemoryAttemptStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryAttemptStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let tracker = AttemptTracker::new(
            "test",
            store.clone(),
            clock.clone(),
            Duration::minutes(15),
            StdDuration::from_secs(1),
        );
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn counts_within_window_and_clears() {
        let (t, _, _) = tracker();
        assert_eq!(t.count("a@example.com").await.unwrap(), 0);
        t.record_failure("a@example.com").await.unwrap();
        t.record_failure("a@example.com").await.unwrap();
        assert_eq!(t.count("a@example.com").await.unwrap(), 2);
        assert_eq!(t.count("b@example.com").await.unwrap(), 0);
        t.clear("a@example.com").await.unwrap();
        assert_eq!(t.count("a@example.com").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lapsed_window_starts_over() {
        let (t, _, clock) = tracker();
        let first = t.record_failure("id").await.unwrap();
        clock.advance(Duration::minutes(10));
        t.record_failure("id").await.unwrap();
        assert_eq!(t.count("id").await.unwrap(), 2);

        clock.advance(Duration::minutes(5));
        assert_eq!(t.count("id").await.unwrap(), 0);
        let next = t.record_failure("id").await.unwrap();
        assert_eq!(next.failure_count, 1);
        assert!(next.window_start > first.window_start);
    }

    #[tokio::test]
    async fn keys_do_not_contain_raw_identifier() {
        let (t, _, _) = tracker();
        let key = t.key("alice@example.com");
        assert!(key.starts_with("test:"));
        assert!(!key.contains("alice"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let (t, _, _) = tracker();
        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let t = t.clone();
                tokio::spawn(async move { t.record_failure("hot").await.unwrap() })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }
        assert_eq!(t.count("hot").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn sweep_drops_lapsed_windows() {
        let (t, store, clock) = tracker();
        t.record_failure("old").await.unwrap();
        clock.advance(Duration::minutes(20));
        t.record_failure("new").await.unwrap();
        assert_eq!(store.purge_expired(clock.now()), 1);
        assert_eq!(store.len(), 1);
    }
}

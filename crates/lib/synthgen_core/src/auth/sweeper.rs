//! Background purge of expired entries from the in-memory TTL stores.
//!
//! Expired entries are already treated as absent on read, so sweeping only
//! bounds memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;

/// A store that can drop entries past their expiry.
pub trait Sweep: Send + Sync {
    /// Remove expired entries, returning how many were dropped.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    /// Store name for logs.
    fn name(&self) -> &'static str;
}

/// Spawn a periodic sweep of `target` that stops when `cancel` fires.
pub fn spawn_sweeper(
    target: Arc<dyn Sweep>,
    clock: Arc<dyn Clock>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let purged = target.purge_expired(clock.now());
                    if purged > 0 {
                        debug!(store = target.name(), purged, "swept expired entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clock::SystemClock;

    struct Counting(AtomicUsize);

    impl Sweep for Counting {
        fn purge_expired(&self, _now: DateTime<Utc>) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn sweeper_runs_until_cancelled() {
        let target = Arc::new(Counting(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            target.clone(),
            Arc::new(SystemClock),
            Duration::from_millis(5),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        handle.await.unwrap();
        let runs = target.0.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected several sweeps, got {runs}");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), runs);
    }
}

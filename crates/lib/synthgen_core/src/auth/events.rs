//! Audit events and user notifications.
//!
//! Both are side effects of auth operations that must never fail or delay
//! the operation itself; [`EventDispatcher`] runs them on spawned tasks and
//! only logs their failures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::AuthError;
use crate::models::auth::OneTimePurpose;

/// Facts about credential activity handed to the audit sink.
///
/// Identifiers that may belong to no account (emails typed at sign-in, client
/// addresses) are carried as hashed keys only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedUp { user_id: String },
    SignedIn { user_id: String },
    SignInFailed { identifier_hash: String },
    AccountLocked { identifier_hash: String },
    TokenRefreshed { user_id: String },
    SignedOut { user_id: String, revoked: usize },
    EmailVerified { user_id: String },
    PasswordResetRequested { identifier_hash: String },
    PasswordResetCompleted { user_id: String },
}

impl AuthEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthEvent::SignedUp { .. } => "signed_up",
            AuthEvent::SignedIn { .. } => "signed_in",
            AuthEvent::SignInFailed { .. } => "sign_in_failed",
            AuthEvent::AccountLocked { .. } => "account_locked",
            AuthEvent::TokenRefreshed { .. } => "token_refreshed",
            AuthEvent::SignedOut { .. } => "signed_out",
            AuthEvent::EmailVerified { .. } => "email_verified",
            AuthEvent::PasswordResetRequested { .. } => "password_reset_requested",
            AuthEvent::PasswordResetCompleted { .. } => "password_reset_completed",
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuthEvent) -> Result<(), AuthError>;
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuthEvent) -> Result<(), AuthError> {
        info!(target: "audit", kind = event.kind(), ?event, "auth event");
        Ok(())
    }
}

/// A message carrying a one-time token to its owner.
#[derive(Clone, PartialEq, Eq)]
pub struct Notification {
    pub email: String,
    pub purpose: OneTimePurpose,
    pub token: String,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("email", &self.email)
            .field("purpose", &self.purpose)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Delivers one-time tokens (email, in production).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), AuthError>;
}

/// Notifier for deployments without mail delivery: logs that a message
/// would have been sent, never the token.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), AuthError> {
        info!(
            purpose = notification.purpose.as_str(),
            "notification delivery not configured; message dropped"
        );
        Ok(())
    }
}

/// Keeps notifications in memory so a local caller can pick tokens up.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Latest token sent to `email` for `purpose`.
    pub fn latest_token(&self, email: &str, purpose: OneTimePurpose) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        sent.iter()
            .rev()
            .find(|n| n.email == email && n.purpose == purpose)
            .map(|n| n.token.clone())
    }

    /// Poll for a token until `wait` elapses; delivery runs on its own task.
    pub async fn wait_for_token(
        &self,
        email: &str,
        purpose: OneTimePurpose,
        wait: Duration,
    ) -> Option<String> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(token) = self.latest_token(email, purpose) {
                return Some(token);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<(), AuthError> {
        self.sent
            .lock()
            .map_err(|_| AuthError::Internal("notifier outbox poisoned".into()))?
            .push(notification);
        Ok(())
    }
}

/// Runs audit and notification side effects fire-and-forget.
#[derive(Clone)]
pub struct EventDispatcher {
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl EventDispatcher {
    pub fn new(audit: Arc<dyn AuditSink>, notifier: Arc<dyn Notifier>) -> Self {
        Self { audit, notifier }
    }

    pub fn audit(&self, event: AuthEvent) {
        let sink = Arc::clone(&self.audit);
        tokio::spawn(async move {
            let kind = event.kind();
            if let Err(e) = sink.record(event).await {
                warn!(kind, error = %e, "audit sink failed");
            }
        });
    }

    pub fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let purpose = notification.purpose.as_str();
            if let Err(e) = notifier.send(notification).await {
                warn!(purpose, error = %e, "notification delivery failed");
            }
        });
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink), Arc::new(LogNotifier))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: AuthEvent) -> Result<(), AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Internal("sink down".into()))
        }
    }

    #[test]
    fn notification_debug_hides_token() {
        let n = Notification {
            email: "a@example.com".into(),
            purpose: OneTimePurpose::EmailVerify,
            token: "secret-token".into(),
        };
        let shown = format!("{n:?}");
        assert!(!shown.contains("secret-token"));
        assert!(shown.contains("a@example.com"));
    }

    #[tokio::test]
    async fn dispatched_notification_reaches_notifier() {
        let outbox = Arc::new(MemoryNotifier::new());
        let dispatcher = EventDispatcher::new(Arc::new(TracingAuditSink), outbox.clone());
        dispatcher.notify(Notification {
            email: "a@example.com".into(),
            purpose: OneTimePurpose::PasswordReset,
            token: "t-1".into(),
        });
        let token = outbox
            .wait_for_token("a@example.com", OneTimePurpose::PasswordReset, Duration::from_secs(1))
            .await;
        assert_eq!(token.as_deref(), Some("t-1"));
        assert!(outbox.latest_token("a@example.com", OneTimePurpose::EmailVerify).is_none());
    }

    #[tokio::test]
    async fn failing_sink_does_not_propagate() {
        let sink = Arc::new(FailingSink::default());
        let outbox = Arc::new(MemoryNotifier::new());
        let dispatcher = EventDispatcher::new(sink.clone(), outbox.clone());
        dispatcher.audit(AuthEvent::SignedIn {
            user_id: "u-1".into(),
        });
        dispatcher.audit(AuthEvent::SignedOut {
            user_id: "u-1".into(),
            revoked: 1,
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink was never called");

        // The dispatcher keeps working after the sink failed.
        dispatcher.notify(Notification {
            email: "a@example.com".into(),
            purpose: OneTimePurpose::EmailVerify,
            token: "t-2".into(),
        });
        let token = outbox
            .wait_for_token("a@example.com", OneTimePurpose::EmailVerify, Duration::from_secs(1))
            .await;
        assert_eq!(token.as_deref(), Some("t-2"));
    }
}

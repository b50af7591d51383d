//! Principal (user account) repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::AuthError;
use crate::models::auth::{NewPrincipal, Principal};
use crate::uuid::uuidv7;

/// Trim and lower-case an email for lookup and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User repository consumed by the session service. Emails passed in are
/// already normalized.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>, AuthError>;

    /// Create an active, unverified principal. Fails with
    /// [`AuthError::ValidationError`] if the email is taken.
    async fn create(&self, new: NewPrincipal) -> Result<Principal, AuthError>;

    async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<(), AuthError>;

    async fn mark_verified(&self, id: &str) -> Result<(), AuthError>;

    async fn touch_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), AuthError>;
}

pub(crate) fn email_taken() -> AuthError {
    AuthError::ValidationError("Email already registered".into())
}

/// In-memory principal store.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalStore {
    by_id: DashMap<String, Principal>,
    id_by_email: DashMap<String, String>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable an account.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        match self.by_id.get_mut(id) {
            Some(mut p) => {
                p.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Principal)) -> Result<(), AuthError> {
        let mut principal = self
            .by_id
            .get_mut(id)
            .ok_or_else(|| AuthError::NotFound("principal".into()))?;
        f(&mut principal);
        Ok(())
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        let Some(id) = self.id_by_email.get(email).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|p| p.value().clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self.by_id.get(id).map(|p| p.value().clone()))
    }

    async fn create(&self, new: NewPrincipal) -> Result<Principal, AuthError> {
        let Entry::Vacant(slot) = self.id_by_email.entry(new.email.clone()) else {
            return Err(email_taken());
        };
        let principal = Principal {
            id: uuidv7().to_string(),
            email: new.email,
            password_hash: Some(new.password_hash),
            role: new.role,
            is_active: true,
            is_verified: false,
            tier: new.tier,
            last_login_at: None,
            created_at: Utc::now(),
        };
        self.by_id.insert(principal.id.clone(), principal.clone());
        slot.insert(principal.id.clone());
        Ok(principal)
    }

    async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<(), AuthError> {
        self.update(id, |p| p.password_hash = Some(password_hash.to_string()))
    }

    async fn mark_verified(&self, id: &str) -> Result<(), AuthError> {
        self.update(id, |p| p.is_verified = true)
    }

    async fn touch_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        self.update(id, |p| p.last_login_at = Some(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::{DEFAULT_ROLE, DEFAULT_TIER};

    fn new_principal(email: &str) -> NewPrincipal {
        NewPrincipal {
            email: email.into(),
            password_hash: "$2b$04$hash".into(),
            role: DEFAULT_ROLE.into(),
            tier: DEFAULT_TIER.into(),
        }
    }

    #[test]
    fn normalizes_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = InMemoryPrincipalStore::new();
        let p = store.create(new_principal("a@example.com")).await.unwrap();
        assert!(p.is_active);
        assert!(!p.is_verified);
        assert_eq!(p.role, "user");

        let by_email = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, p.id);
        let by_id = store.find_by_id(&p.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@example.com");
        assert!(store.find_by_email("b@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryPrincipalStore::new();
        store.create(new_principal("a@example.com")).await.unwrap();
        assert!(matches!(
            store.create(new_principal("a@example.com")).await,
            Err(AuthError::ValidationError(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn updates_apply_to_existing_principal_only() {
        let store = InMemoryPrincipalStore::new();
        let p = store.create(new_principal("a@example.com")).await.unwrap();
        store.mark_verified(&p.id).await.unwrap();
        store.set_password_hash(&p.id, "$2b$04$other").await.unwrap();
        let now = Utc::now();
        store.touch_last_login(&p.id, now).await.unwrap();

        let p = store.find_by_id(&p.id).await.unwrap().unwrap();
        assert!(p.is_verified);
        assert_eq!(p.password_hash.as_deref(), Some("$2b$04$other"));
        assert_eq!(p.last_login_at, Some(now));

        assert!(matches!(
            store.mark_verified("missing").await,
            Err(AuthError::NotFound(_))
        ));
    }
}

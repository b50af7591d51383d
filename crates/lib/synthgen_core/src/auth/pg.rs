//! PostgreSQL-backed stores for principals, API keys and one-time tokens.
//!
//! Revocation, attempt and lockout records are short-lived and stay in
//! memory; these three are the durable ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AuthError;
use super::api_keys::ApiKeyStore;
use super::one_time::OneTimeTokenStore;
use super::principals::PrincipalStore;
use super::queries;
use crate::models::auth::{ApiKeyRecord, NewPrincipal, OneTimePurpose, OneTimeTokenRecord, Principal};
use crate::uuid::uuidv7;

/// Ids arrive as text (token subjects, URL paths); a non-UUID can match nothing.
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

fn missing_principal() -> AuthError {
    AuthError::NotFound("principal".into())
}

#[derive(Debug, Clone)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        queries::find_principal_by_email(&self.pool, email).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Principal>, AuthError> {
        match parse_id(id) {
            Some(id) => queries::find_principal_by_id(&self.pool, &id).await,
            None => Ok(None),
        }
    }

    async fn create(&self, new: NewPrincipal) -> Result<Principal, AuthError> {
        queries::insert_principal(&self.pool, &uuidv7(), &new).await
    }

    async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<(), AuthError> {
        let id = parse_id(id).ok_or_else(missing_principal)?;
        queries::update_password_hash(&self.pool, &id, password_hash).await
    }

    async fn mark_verified(&self, id: &str) -> Result<(), AuthError> {
        let id = parse_id(id).ok_or_else(missing_principal)?;
        queries::mark_principal_verified(&self.pool, &id).await
    }

    async fn touch_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        let id = parse_id(id).ok_or_else(missing_principal)?;
        queries::touch_last_login(&self.pool, &id, at).await
    }
}

#[derive(Debug, Clone)]
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn insert(&self, record: ApiKeyRecord) -> Result<(), AuthError> {
        queries::insert_api_key(&self.pool, &record).await
    }

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        queries::find_api_key_by_hash(&self.pool, secret_hash).await
    }

    async fn deactivate(&self, owner_id: &str, key_id: &str) -> Result<bool, AuthError> {
        let (Some(owner_id), Some(key_id)) = (parse_id(owner_id), parse_id(key_id)) else {
            return Ok(false);
        };
        queries::deactivate_api_key(&self.pool, &owner_id, &key_id).await
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        match parse_id(owner_id) {
            Some(owner_id) => queries::list_api_keys(&self.pool, &owner_id).await,
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgOneTimeTokenStore {
    pool: PgPool,
}

impl PgOneTimeTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired rows; consumed rows go with them.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        queries::delete_expired_one_time_tokens(&self.pool, now).await
    }
}

#[async_trait]
impl OneTimeTokenStore for PgOneTimeTokenStore {
    async fn insert(&self, record: OneTimeTokenRecord) -> Result<(), AuthError> {
        queries::insert_one_time_token(&self.pool, &record).await
    }

    async fn consume(
        &self,
        token_hash: &str,
        purpose: OneTimePurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AuthError> {
        queries::consume_one_time_token(&self.pool, token_hash, purpose.as_str(), now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_non_uuid() {
        assert!(parse_id("not-a-uuid").is_none());
        let id = uuidv7();
        assert_eq!(parse_id(&id.to_string()), Some(id));
    }
}

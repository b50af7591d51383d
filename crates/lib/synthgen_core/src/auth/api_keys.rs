//! API key management.
//!
//! Long-lived bearer secrets for programmatic clients. Only a keyed
//! HMAC-SHA256 of the secret is stored; the raw value is shown once.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::{AuthError, bounded};
use crate::clock::Clock;
use crate::models::auth::{ApiKeyRecord, IssuedApiKey};
use crate::uuid::uuidv7;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every raw API key.
pub const API_KEY_PREFIX: &str = "sgk_";

const SECRET_LEN: usize = 64;
const MAX_NAME_LEN: usize = 100;

/// Backend for API key records.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Insert a new key. Fails with [`AuthError::ValidationError`] if the
    /// owner already holds an active key with the same name.
    async fn insert(&self, record: ApiKeyRecord) -> Result<(), AuthError>;

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError>;

    /// Clear the active flag. `false` if no such key belongs to `owner_id`.
    async fn deactivate(&self, owner_id: &str, key_id: &str) -> Result<bool, AuthError>;

    /// All keys of `owner_id`, newest first.
    async fn list(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError>;
}

/// In-memory API key store. Keys are grouped per owner so the name check
/// and the insert happen under one entry lock.
#[derive(Debug, Default)]
pub struct InMemoryApiKeyStore {
    by_owner: DashMap<String, Vec<ApiKeyRecord>>,
    owner_by_hash: DashMap<String, String>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn insert(&self, record: ApiKeyRecord) -> Result<(), AuthError> {
        let mut keys = self.by_owner.entry(record.owner_id.clone()).or_default();
        if keys.iter().any(|k| k.is_active && k.name == record.name) {
            return Err(duplicate_name(&record.name));
        }
        self.owner_by_hash
            .insert(record.secret_hash.clone(), record.owner_id.clone());
        keys.push(record);
        Ok(())
    }

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        let Some(owner) = self.owner_by_hash.get(secret_hash).map(|o| o.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_owner.get(&owner).and_then(|keys| {
            keys.iter()
                .find(|k| k.secret_hash == secret_hash)
                .cloned()
        }))
    }

    async fn deactivate(&self, owner_id: &str, key_id: &str) -> Result<bool, AuthError> {
        let Some(mut keys) = self.by_owner.get_mut(owner_id) else {
            return Ok(false);
        };
        match keys.iter_mut().find(|k| k.id == key_id) {
            Some(key) => {
                key.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        let mut keys = self
            .by_owner
            .get(owner_id)
            .map(|k| k.value().clone())
            .unwrap_or_default();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(keys)
    }
}

pub(crate) fn duplicate_name(name: &str) -> AuthError {
    AuthError::ValidationError(format!(
        "An active API key named '{name}' already exists"
    ))
}

/// Generate a raw key: prefix plus 64 alphanumeric characters.
fn generate_secret() -> String {
    let body: String = rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();
    format!("{API_KEY_PREFIX}{body}")
}

/// Issues, checks and deactivates API keys.
#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn ApiKeyStore>,
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
    timeout: StdDuration,
}

impl ApiKeyService {
    /// `pepper` keys the HMAC; changing it invalidates every stored key.
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        pepper: &[u8],
        clock: Arc<dyn Clock>,
        timeout: StdDuration,
    ) -> Result<Self, AuthError> {
        let mac = HmacSha256::new_from_slice(pepper)
            .map_err(|e| AuthError::Internal(format!("invalid API key pepper: {e}")))?;
        Ok(Self {
            store,
            mac,
            clock,
            timeout,
        })
    }

    /// Keyed hash of a raw secret (hex).
    pub fn hash_secret(&self, raw_secret: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw_secret.as_bytes());
        let digest = mac.finalize().into_bytes();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Fresh `(raw_secret, secret_hash)` pair.
    pub fn generate(&self) -> (String, String) {
        let raw = generate_secret();
        let hash = self.hash_secret(&raw);
        (raw, hash)
    }

    /// Constant-time check of `raw_secret` against a stored hash.
    pub fn verify(&self, raw_secret: &str, secret_hash: &str) -> bool {
        let computed = self.hash_secret(raw_secret);
        computed.as_bytes().ct_eq(secret_hash.as_bytes()).into()
    }

    /// Create a key for `owner_id`. The raw secret is only in the result.
    pub async fn issue(
        &self,
        owner_id: &str,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedApiKey, AuthError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(AuthError::ValidationError(format!(
                "API key name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }
        let now = self.clock.now();
        if let Some(at) = expires_at
            && at <= now
        {
            return Err(AuthError::ValidationError(
                "API key expiry must be in the future".into(),
            ));
        }

        let (raw_secret, secret_hash) = self.generate();
        let record = ApiKeyRecord {
            id: uuidv7().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            secret_hash,
            is_active: true,
            expires_at,
            created_at: now,
        };
        bounded(self.timeout, self.store.insert(record.clone())).await?;
        info!(user_id = %owner_id, key_id = %record.id, "API key issued");

        Ok(IssuedApiKey {
            key_id: record.id.clone(),
            raw_secret,
            record,
        })
    }

    /// Resolve a presented raw key. Unknown, inactive and expired keys are
    /// all [`AuthError::Unauthorized`].
    pub async fn authenticate(&self, raw_secret: &str) -> Result<ApiKeyRecord, AuthError> {
        if !raw_secret.starts_with(API_KEY_PREFIX) {
            return Err(AuthError::Unauthorized);
        }
        let hash = self.hash_secret(raw_secret);
        let record = bounded(self.timeout, self.store.find_by_hash(&hash))
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !self.verify(raw_secret, &record.secret_hash) {
            return Err(AuthError::Unauthorized);
        }
        if !record.is_active {
            debug!(key_id = %record.id, "inactive API key presented");
            return Err(AuthError::Unauthorized);
        }
        if let Some(at) = record.expires_at
            && at <= self.clock.now()
        {
            debug!(key_id = %record.id, "expired API key presented");
            return Err(AuthError::Unauthorized);
        }
        Ok(record)
    }

    /// Deactivate a key owned by `owner_id`. Another owner's key is
    /// indistinguishable from a missing one.
    pub async fn deactivate(&self, owner_id: &str, key_id: &str) -> Result<(), AuthError> {
        let found = bounded(self.timeout, self.store.deactivate(owner_id, key_id)).await?;
        if !found {
            return Err(AuthError::NotFound("API key".into()));
        }
        info!(user_id = %owner_id, key_id = %key_id, "API key deactivated");
        Ok(())
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, AuthError> {
        bounded(self.timeout, self.store.list(owner_id)).await
    }
}

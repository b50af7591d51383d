//! Wiring of stores into the auth services.

use std::sync::Arc;

use super::AuthError;
use super::api_keys::{ApiKeyService, ApiKeyStore, InMemoryApiKeyStore};
use super::attempts::{AttemptStore, InMemoryAttemptStore};
use super::events::EventDispatcher;
use super::lockout::{InMemoryLockoutStore, LockoutStore};
use super::one_time::{InMemoryOneTimeTokenStore, OneTimeTokenStore};
use super::principals::{InMemoryPrincipalStore, PrincipalStore};
use super::revocation::{InMemoryRevocationStore, RevocationStore};
use super::session::SessionService;
use super::sweeper::Sweep;
use crate::clock::Clock;
use crate::config::AuthConfig;

/// Store backends the auth services run on.
#[derive(Clone)]
pub struct AuthStores {
    pub principals: Arc<dyn PrincipalStore>,
    pub revocations: Arc<dyn RevocationStore>,
    /// Shared by lockout and rate limiting; their keys are namespaced.
    pub attempts: Arc<dyn AttemptStore>,
    pub locks: Arc<dyn LockoutStore>,
    pub one_time: Arc<dyn OneTimeTokenStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
}

/// Every store in memory. Handles stay concrete so tests and the server
/// can reach the sweepable and inspectable parts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStores {
    pub principals: Arc<InMemoryPrincipalStore>,
    pub revocations: Arc<InMemoryRevocationStore>,
    pub attempts: Arc<InMemoryAttemptStore>,
    pub locks: Arc<InMemoryLockoutStore>,
    pub one_time: Arc<InMemoryOneTimeTokenStore>,
    pub api_keys: Arc<InMemoryApiKeyStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> AuthStores {
        AuthStores {
            principals: self.principals.clone(),
            revocations: self.revocations.clone(),
            attempts: self.attempts.clone(),
            locks: self.locks.clone(),
            one_time: self.one_time.clone(),
            api_keys: self.api_keys.clone(),
        }
    }

    /// TTL stores for [`super::sweeper::spawn_sweeper`].
    pub fn sweepables(&self) -> Vec<Arc<dyn Sweep>> {
        vec![
            self.revocations.clone(),
            self.attempts.clone(),
            self.locks.clone(),
            self.one_time.clone(),
        ]
    }
}

/// The two services request handlers use.
#[derive(Clone)]
pub struct AuthServices {
    pub sessions: SessionService,
    pub api_keys: ApiKeyService,
}

impl AuthServices {
    pub fn build(
        config: &AuthConfig,
        jwt_secret: &[u8],
        stores: AuthStores,
        clock: Arc<dyn Clock>,
        events: EventDispatcher,
    ) -> Result<Self, AuthError> {
        let api_keys = ApiKeyService::new(
            stores.api_keys.clone(),
            config.api_key_pepper.as_bytes(),
            clock.clone(),
            config.store_timeout,
        )?;
        let sessions = SessionService::new(config, jwt_secret, stores, clock, events);
        Ok(Self { sessions, api_keys })
    }
}

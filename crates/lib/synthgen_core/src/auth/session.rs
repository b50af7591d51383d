//! Session orchestration.
//!
//! [`SessionService`] is what request handlers call: sign-up, sign-in,
//! refresh, sign-out, the per-request token check, email verification and
//! password reset. It owns no state of its own; everything lives in the
//! injected stores.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration};
use tracing::{debug, info, warn};

use super::attempts::AttemptTracker;
use super::events::{AuthEvent, EventDispatcher, Notification};
use super::jwt::TokenCodec;
use super::lockout::{LockoutManager, LockoutStatus};
use super::one_time::OneTimeTokenService;
use super::password::{CredentialHasher, validate_new_password};
use super::principals::{PrincipalStore, normalize_email};
use super::rate_limit::RateLimiter;
use super::revocation::RevocationList;
use super::stores::AuthStores;
use super::{AuthError, bounded, fingerprint};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::models::auth::{
    AccessToken, DEFAULT_ROLE, DEFAULT_TIER, NewPrincipal, OneTimePurpose, Principal,
    SessionClaims, Subject, TokenPair, TokenType,
};

const MAX_EMAIL_LEN: usize = 254;

/// Sign-in input.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Caller address for per-client throttling, when known.
    pub client_ip: Option<String>,
}

/// Check the shape of an already-normalized email.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && email
            .rsplit_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid {
        return Err(AuthError::ValidationError("Invalid email address".into()));
    }
    Ok(())
}

/// Facade over the credential components.
#[derive(Clone)]
pub struct SessionService {
    principals: Arc<dyn PrincipalStore>,
    hasher: CredentialHasher,
    codec: TokenCodec,
    revocations: RevocationList,
    lockout: LockoutManager,
    rate_limiter: RateLimiter,
    one_time: OneTimeTokenService,
    events: EventDispatcher,
    clock: Arc<dyn Clock>,
    timeout: StdDuration,
    access_ttl: Duration,
    refresh_ttl: Duration,
    password_reset_ttl: Duration,
    email_verify_ttl: Duration,
}

impl SessionService {
    pub fn new(
        config: &AuthConfig,
        jwt_secret: &[u8],
        stores: AuthStores,
        clock: Arc<dyn Clock>,
        events: EventDispatcher,
    ) -> Self {
        let timeout = config.store_timeout;
        let login_attempts = AttemptTracker::new(
            "login",
            stores.attempts.clone(),
            clock.clone(),
            config.attempt_window,
            timeout,
        );
        let client_attempts = AttemptTracker::new(
            "client",
            stores.attempts,
            clock.clone(),
            config.rate_limit_window,
            timeout,
        );
        Self {
            principals: stores.principals,
            hasher: CredentialHasher::new(config.bcrypt_cost),
            codec: TokenCodec::new(jwt_secret, clock.clone()),
            revocations: RevocationList::new(stores.revocations, clock.clone(), timeout),
            lockout: LockoutManager::new(login_attempts, stores.locks, config.lockout, timeout),
            rate_limiter: RateLimiter::new(client_attempts, config.rate_limit_max),
            one_time: OneTimeTokenService::new(stores.one_time, clock.clone(), timeout),
            events,
            clock,
            timeout,
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            password_reset_ttl: config.password_reset_ttl,
            email_verify_ttl: config.email_verify_ttl,
        }
    }

    /// Lifetime of refresh tokens, for cookie max-age.
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Register a new principal and send it an email verification token.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let email = normalize_email(email);
        validate_email(&email)?;
        validate_new_password(password)?;

        if bounded(self.timeout, self.principals.find_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AuthError::ValidationError("Email already registered".into()));
        }

        let password_hash = self.hasher.hash_async(password).await?;
        let principal = bounded(
            self.timeout,
            self.principals.create(NewPrincipal {
                email: email.clone(),
                password_hash,
                role: DEFAULT_ROLE.into(),
                tier: DEFAULT_TIER.into(),
            }),
        )
        .await?;
        info!(user_id = %principal.id, "principal registered");

        match self
            .one_time
            .generate(OneTimePurpose::EmailVerify, &email, self.email_verify_ttl)
            .await
        {
            Ok(token) => self.events.notify(Notification {
                email,
                purpose: OneTimePurpose::EmailVerify,
                token,
            }),
            Err(e) => warn!(user_id = %principal.id, error = %e, "verification token not issued"),
        }
        self.events.audit(AuthEvent::SignedUp {
            user_id: principal.id.clone(),
        });
        Ok(principal)
    }

    /// Sign in with email and password.
    ///
    /// Unknown email, wrong password and inactive account all fail with
    /// [`AuthError::InvalidCredentials`] after the same amount of hashing.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        let email = normalize_email(&credentials.email);
        self.lockout.ensure_unlocked(&email).await?;
        if let Some(ip) = &credentials.client_ip {
            self.rate_limiter.check(ip).await?;
        }

        let principal = bounded(self.timeout, self.principals.find_by_email(&email)).await?;
        let stored_hash = principal.as_ref().and_then(|p| p.password_hash.as_deref());
        let password_ok = self
            .hasher
            .verify_async(&credentials.password, stored_hash)
            .await?;

        let principal = match principal {
            Some(p) if password_ok && p.is_active => p,
            _ => return Err(self.sign_in_failed(&email, credentials).await?),
        };

        self.lockout.record_success(&email).await?;
        let subject = Subject::from(&principal);
        let pair = self.issue_pair(&subject)?;
        bounded(
            self.timeout,
            self.principals
                .touch_last_login(&principal.id, self.clock.now()),
        )
        .await?;

        info!(user_id = %principal.id, "signed in");
        self.events.audit(AuthEvent::SignedIn {
            user_id: principal.id,
        });
        Ok(pair)
    }

    /// Count a failed sign-in and return the error to hand back.
    async fn sign_in_failed(
        &self,
        email: &str,
        credentials: &Credentials,
    ) -> Result<AuthError, AuthError> {
        let status = self.lockout.record_failure(email).await?;
        if let Some(ip) = &credentials.client_ip {
            self.rate_limiter.record_failure(ip).await?;
        }
        let identifier_hash = fingerprint(email);
        if let LockoutStatus::Locked { .. } = status {
            self.events.audit(AuthEvent::AccountLocked {
                identifier_hash: identifier_hash.clone(),
            });
        }
        debug!(identifier_hash = %identifier_hash, "sign-in failed");
        self.events
            .audit(AuthEvent::SignInFailed { identifier_hash });
        Ok(AuthError::InvalidCredentials)
    }

    fn issue_pair(&self, subject: &Subject) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self
                .codec
                .issue(subject, TokenType::Access, self.access_ttl)?,
            refresh_token: self
                .codec
                .issue(subject, TokenType::Refresh, self.refresh_ttl)?,
            expires_in: self.access_ttl.num_seconds(),
            subject: subject.clone(),
        })
    }

    /// Exchange a refresh token for a new access token. The refresh token
    /// itself is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, AuthError> {
        let claims = self.codec.verify_refresh(refresh_token)?;
        self.revocations.ensure_live(refresh_token, &claims).await?;

        let subject = self.active_subject(&claims.sub).await?;

        let access_token = self
            .codec
            .issue(&subject, TokenType::Access, self.access_ttl)?;
        self.events.audit(AuthEvent::TokenRefreshed {
            user_id: subject.id,
        });
        Ok(AccessToken {
            access_token,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Revoke every presented token for the rest of its lifetime. Tokens
    /// that no longer verify are skipped. Returns how many were revoked.
    pub async fn sign_out(&self, tokens: &[&str]) -> Result<usize, AuthError> {
        let mut revoked = 0;
        let mut user_id = None;
        for token in tokens {
            let claims = match self.codec.verify(token) {
                Ok(verified) => verified.into_claims(),
                Err(e) => {
                    debug!(error = %e, "skipping unverifiable token at sign-out");
                    continue;
                }
            };
            // A token is still accepted during its expiry second.
            let expires_at = DateTime::from_timestamp(claims.exp + 1, 0)
                .ok_or_else(|| AuthError::Internal("token expiry out of range".into()))?;
            self.revocations.revoke(token, expires_at).await?;
            revoked += 1;
            user_id = Some(claims.sub);
        }
        if let Some(user_id) = user_id {
            info!(user_id = %user_id, revoked, "signed out");
            self.events.audit(AuthEvent::SignedOut { user_id, revoked });
        }
        Ok(revoked)
    }

    /// Check an access token presented with a request.
    pub async fn authenticate(&self, access_token: &str) -> Result<SessionClaims, AuthError> {
        let claims = self.codec.verify_access(access_token)?;
        self.revocations.ensure_live(access_token, &claims).await?;
        Ok(claims)
    }

    /// Current subject for principal `id`. Missing or deactivated principals
    /// are [`AuthError::Unauthorized`].
    pub async fn active_subject(&self, id: &str) -> Result<Subject, AuthError> {
        let principal = bounded(self.timeout, self.principals.find_by_id(id))
            .await?
            .filter(|p| p.is_active)
            .ok_or(AuthError::Unauthorized)?;
        Ok(Subject::from(&principal))
    }

    /// Consume an email verification token and mark its principal verified.
    pub async fn verify_email(&self, token: &str) -> Result<(), AuthError> {
        let email = self.one_time.verify(OneTimePurpose::EmailVerify, token).await?;
        let principal = bounded(self.timeout, self.principals.find_by_email(&email))
            .await?
            .ok_or(AuthError::OneTimeTokenInvalid)?;
        bounded(self.timeout, self.principals.mark_verified(&principal.id)).await?;

        info!(user_id = %principal.id, "email verified");
        self.events.audit(AuthEvent::EmailVerified {
            user_id: principal.id,
        });
        Ok(())
    }

    /// Send a reset token if `email` belongs to an active principal. Always
    /// succeeds, and the lookup and token generation run on a background
    /// task, so neither the outcome nor the latency reveals whether the
    /// address is registered.
    pub async fn request_password_reset(&self, email: &str) {
        let email = normalize_email(email);
        let identifier_hash = fingerprint(&email);
        let this = self.clone();
        let hash = identifier_hash.clone();
        tokio::spawn(async move {
            if let Err(e) = this.send_reset_token(&email).await {
                warn!(identifier_hash = %hash, error = %e, "password reset request failed");
            }
        });
        self.events
            .audit(AuthEvent::PasswordResetRequested { identifier_hash });
    }

    async fn send_reset_token(&self, email: &str) -> Result<(), AuthError> {
        let principal = bounded(self.timeout, self.principals.find_by_email(email)).await?;
        let Some(principal) = principal.filter(|p| p.is_active) else {
            return Ok(());
        };
        let token = self
            .one_time
            .generate(OneTimePurpose::PasswordReset, email, self.password_reset_ttl)
            .await?;
        self.events.notify(Notification {
            email: principal.email,
            purpose: OneTimePurpose::PasswordReset,
            token,
        });
        Ok(())
    }

    /// Set a new password with a reset token. Every token issued to the
    /// principal before now is revoked and any lockout is lifted.
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_new_password(new_password)?;
        let email = self
            .one_time
            .verify(OneTimePurpose::PasswordReset, token)
            .await?;
        let principal = bounded(self.timeout, self.principals.find_by_email(&email))
            .await?
            .ok_or(AuthError::OneTimeTokenInvalid)?;

        let password_hash = self.hasher.hash_async(new_password).await?;
        bounded(
            self.timeout,
            self.principals
                .set_password_hash(&principal.id, &password_hash),
        )
        .await?;
        self.revocations
            .revoke_subject(&principal.id, self.refresh_ttl)
            .await?;
        self.lockout.reset(&email).await?;

        info!(user_id = %principal.id, "password reset");
        self.events.audit(AuthEvent::PasswordResetCompleted {
            user_id: principal.id,
        });
        Ok(())
    }
}

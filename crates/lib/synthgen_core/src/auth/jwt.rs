//! JWT session token issuing and verification.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info};

use super::AuthError;
use crate::clock::Clock;
use crate::models::auth::{SessionClaims, Subject, TokenType};
use crate::uuid::uuidv7;

/// The only accepted signing algorithm.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// A verified token, tagged by the slot it may be used in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedToken {
    Access(SessionClaims),
    Refresh(SessionClaims),
}

impl VerifiedToken {
    pub fn claims(&self) -> &SessionClaims {
        match self {
            VerifiedToken::Access(c) | VerifiedToken::Refresh(c) => c,
        }
    }

    pub fn into_claims(self) -> SessionClaims {
        match self {
            VerifiedToken::Access(c) | VerifiedToken::Refresh(c) => c,
        }
    }

    pub fn into_access(self) -> Result<SessionClaims, AuthError> {
        match self {
            VerifiedToken::Access(c) => Ok(c),
            VerifiedToken::Refresh(_) => Err(AuthError::TokenWrongType),
        }
    }

    pub fn into_refresh(self) -> Result<SessionClaims, AuthError> {
        match self {
            VerifiedToken::Refresh(c) => Ok(c),
            VerifiedToken::Access(_) => Err(AuthError::TokenWrongType),
        }
    }
}

/// Signs and verifies HS256 session tokens with one shared secret.
///
/// Expiry is checked against the injected clock, not by the JWT library.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            clock,
        }
    }

    /// Issue a token for `subject` that expires `ttl` from now.
    pub fn issue(
        &self,
        subject: &Subject,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = SessionClaims {
            sub: subject.id.clone(),
            email: subject.email.clone(),
            role: subject.role.clone(),
            token_type,
            iat: now.timestamp(),
            iat_ms: now.timestamp_millis(),
            exp: (now + ttl).timestamp(),
            jti: uuidv7().to_string(),
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify signature, algorithm, structure and expiry.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                kind => {
                    debug!(?kind, "rejected session token");
                    AuthError::TokenMalformed
                }
            },
        )?;
        let claims = data.claims;
        if claims.exp < self.clock.now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(match claims.token_type {
            TokenType::Access => VerifiedToken::Access(claims),
            TokenType::Refresh => VerifiedToken::Refresh(claims),
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.verify(token)?.into_access()
    }

    pub fn verify_refresh(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.verify(token)?.into_refresh()
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    resolve_jwt_secret_at(&jwt_secret_path())
}

/// Read the secret persisted at `path`, generating and persisting one if absent.
pub fn resolve_jwt_secret_at(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, &secret);
    info!(path = %path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synthgen")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SECRET: &[u8] = b"test-secret-with-enough-bytes-000";

    fn subject() -> Subject {
        Subject {
            id: "u-42".into(),
            email: "alice@example.com".into(),
            role: "user".into(),
        }
    }

    fn codec() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (TokenCodec::new(SECRET, clock.clone()), clock)
    }

    #[test]
    fn issued_token_verifies_with_same_subject() {
        let (codec, clock) = codec();
        let token = codec
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        let claims = codec.verify_access(&token).unwrap();
        assert_eq!(claims.sub, "u-42");
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.iat, clock.now().timestamp());
        assert_eq!(claims.iat_ms, clock.now().timestamp_millis());
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn token_expires_after_ttl() {
        let (codec, clock) = codec();
        let token = codec
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        clock.advance(Duration::minutes(15));
        assert!(codec.verify_access(&token).is_ok());
        clock.advance(Duration::seconds(1));
        assert!(matches!(
            codec.verify_access(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn wrong_type_is_rejected_both_ways() {
        let (codec, _) = codec();
        let access = codec
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        let refresh = codec
            .issue(&subject(), TokenType::Refresh, Duration::days(7))
            .unwrap();
        assert!(matches!(
            codec.verify_refresh(&access),
            Err(AuthError::TokenWrongType)
        ));
        assert!(matches!(
            codec.verify_access(&refresh),
            Err(AuthError::TokenWrongType)
        ));
    }

    #[test]
    fn other_secret_is_rejected() {
        let (codec, clock) = codec();
        let other = TokenCodec::new(b"another-secret-another-secret-00", clock);
        let token = other
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        assert!(matches!(
            codec.verify(&token),
            Err(AuthError::TokenMalformed)
        ));
    }

    #[test]
    fn other_algorithm_is_rejected() {
        let (codec, clock) = codec();
        let now = clock.now().timestamp();
        let claims = SessionClaims {
            sub: "u-42".into(),
            email: "alice@example.com".into(),
            role: "admin".into(),
            token_type: TokenType::Access,
            iat: now,
            iat_ms: now * 1000,
            exp: now + 900,
            jti: "j".into(),
        };
        // Same secret, different HMAC algorithm.
        let forged = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(
            codec.verify(&forged),
            Err(AuthError::TokenMalformed)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let (codec, _) = codec();
        for bad in ["", "abc", "a.b.c", "eyJhbGciOiJIUzI1NiJ9..sig"] {
            assert!(matches!(codec.verify(bad), Err(AuthError::TokenMalformed)));
        }
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (codec, _) = codec();
        let token = codec
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        let other = codec
            .issue(
                &Subject {
                    id: "u-1".into(),
                    ..subject()
                },
                TokenType::Access,
                Duration::minutes(15),
            )
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let other_payload = other.split('.').nth(1).unwrap();
        let spliced = format!("{}.{}.{}", parts[0], other_payload, parts[2]);
        assert!(matches!(
            codec.verify(&spliced),
            Err(AuthError::TokenMalformed)
        ));
    }

    #[test]
    fn tokens_issued_together_differ() {
        let (codec, _) = codec();
        let a = codec
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        let b = codec
            .issue(&subject(), TokenType::Access, Duration::minutes(15))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn persisted_secret_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jwt-secret");
        let first = resolve_jwt_secret_at(&path);
        assert_eq!(first.len(), 64);
        assert_eq!(resolve_jwt_secret_at(&path), first);
    }
}

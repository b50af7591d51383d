//! Password hashing via bcrypt.

use std::sync::{Arc, OnceLock};

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Salted, deliberately slow password hasher.
///
/// Hashing and verification run on the blocking pool; the cost factor is the
/// brute-force backpressure and is never lowered at runtime.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    cost: u32,
    dummy: Arc<OnceLock<String>>,
}

impl CredentialHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            dummy: Arc::new(OnceLock::new()),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password (salt is embedded in the output).
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a bcrypt hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(password, hash)
            .map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
    }

    pub async fn hash_async(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    /// Verify on the blocking pool. With no stored hash the password is checked
    /// against a dummy hash of the same cost and the result is always `false`.
    pub async fn verify_async(&self, password: &str, hash: Option<&str>) -> Result<bool, AuthError> {
        let hasher = self.clone();
        let password = password.to_string();
        let hash = hash.map(str::to_string);
        tokio::task::spawn_blocking(move || match hash {
            Some(h) => hasher.verify(&password, &h),
            None => {
                let dummy = hasher.dummy_hash()?;
                hasher.verify(&password, &dummy)?;
                Ok(false)
            }
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?
    }

    fn dummy_hash(&self) -> Result<String, AuthError> {
        if let Some(h) = self.dummy.get() {
            return Ok(h.clone());
        }
        let h = self.hash("synthgen-dummy-password")?;
        Ok(self.dummy.get_or_init(|| h).clone())
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

/// Check password policy for new passwords.
pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(4)
    }

    #[test]
    fn hash_then_verify() {
        let h = hasher();
        let hash = h.hash("Str0ng!Pass").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(h.verify("Str0ng!Pass", &hash).unwrap());
        assert!(!h.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let h = hasher();
        assert_ne!(h.hash("Str0ng!Pass").unwrap(), h.hash("Str0ng!Pass").unwrap());
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(hasher().verify("x", "not-a-bcrypt-hash").is_err());
    }

    #[tokio::test]
    async fn verify_async_without_hash_is_false() {
        let h = hasher();
        assert!(!h.verify_async("anything", None).await.unwrap());
    }

    #[tokio::test]
    async fn async_roundtrip() {
        let h = hasher();
        let hash = h.hash_async("Str0ng!Pass").await.unwrap();
        assert!(h.verify_async("Str0ng!Pass", Some(&hash)).await.unwrap());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_new_password("short").is_err());
        assert!(validate_new_password("long-enough").is_ok());
    }
}

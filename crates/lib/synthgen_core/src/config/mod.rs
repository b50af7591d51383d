//! Credential engine settings.
//!
//! Defaults suit a single-node deployment; every value can be overridden
//! from `AUTH_*` environment variables.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use crate::auth::lockout::LockoutPolicy;
use crate::auth::password::DEFAULT_BCRYPT_COST;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Development pepper; deployments must set `AUTH_API_KEY_PEPPER`.
const DEV_API_KEY_PEPPER: &str = "synthgen-api-key-dev-pepper-change-in-production";

/// Tunables of the credential engine.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub bcrypt_cost: u32,
    /// Window in which per-account failures are counted.
    pub attempt_window: Duration,
    pub lockout: LockoutPolicy,
    /// Failed sign-ins per client address before throttling.
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub password_reset_ttl: Duration,
    pub email_verify_ttl: Duration,
    /// Deadline for every store call.
    pub store_timeout: StdDuration,
    /// How often in-memory stores drop expired entries.
    pub sweep_interval: StdDuration,
    pub api_key_pepper: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            attempt_window: Duration::minutes(15),
            lockout: LockoutPolicy::default(),
            rate_limit_max: 20,
            rate_limit_window: Duration::minutes(15),
            password_reset_ttl: Duration::hours(1),
            email_verify_ttl: Duration::hours(24),
            store_timeout: StdDuration::from_millis(2000),
            sweep_interval: StdDuration::from_secs(60),
            api_key_pepper: DEV_API_KEY_PEPPER.into(),
        }
    }
}

impl AuthConfig {
    /// Reads configuration from environment variables over the defaults.
    ///
    /// | Variable                       | Default   |
    /// |--------------------------------|-----------|
    /// | `AUTH_ACCESS_TTL_SECS`         | `900`     |
    /// | `AUTH_REFRESH_TTL_SECS`        | `604800`  |
    /// | `AUTH_BCRYPT_COST`             | `10`      |
    /// | `AUTH_ATTEMPT_WINDOW_SECS`     | `900`     |
    /// | `AUTH_LOCKOUT_MAX_FAILURES`    | `5`       |
    /// | `AUTH_LOCKOUT_DURATION_SECS`   | `900`     |
    /// | `AUTH_RATE_LIMIT_MAX`          | `20`      |
    /// | `AUTH_RATE_LIMIT_WINDOW_SECS`  | `900`     |
    /// | `AUTH_PASSWORD_RESET_TTL_SECS` | `3600`    |
    /// | `AUTH_EMAIL_VERIFY_TTL_SECS`   | `86400`   |
    /// | `AUTH_STORE_TIMEOUT_MS`        | `2000`    |
    /// | `AUTH_SWEEP_INTERVAL_SECS`     | `60`      |
    /// | `AUTH_API_KEY_PEPPER`          | dev value |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AuthConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse::<i64>(&lookup, key)?.map_or(default, Duration::seconds))
        };

        let config = Self {
            access_ttl: secs("AUTH_ACCESS_TTL_SECS", d.access_ttl)?,
            refresh_ttl: secs("AUTH_REFRESH_TTL_SECS", d.refresh_ttl)?,
            bcrypt_cost: parse(&lookup, "AUTH_BCRYPT_COST")?.unwrap_or(d.bcrypt_cost),
            attempt_window: secs("AUTH_ATTEMPT_WINDOW_SECS", d.attempt_window)?,
            lockout: LockoutPolicy {
                max_failures: parse(&lookup, "AUTH_LOCKOUT_MAX_FAILURES")?
                    .unwrap_or(d.lockout.max_failures),
                lock_duration: secs("AUTH_LOCKOUT_DURATION_SECS", d.lockout.lock_duration)?,
            },
            rate_limit_max: parse(&lookup, "AUTH_RATE_LIMIT_MAX")?.unwrap_or(d.rate_limit_max),
            rate_limit_window: secs("AUTH_RATE_LIMIT_WINDOW_SECS", d.rate_limit_window)?,
            password_reset_ttl: secs("AUTH_PASSWORD_RESET_TTL_SECS", d.password_reset_ttl)?,
            email_verify_ttl: secs("AUTH_EMAIL_VERIFY_TTL_SECS", d.email_verify_ttl)?,
            store_timeout: parse(&lookup, "AUTH_STORE_TIMEOUT_MS")?
                .map_or(d.store_timeout, StdDuration::from_millis),
            sweep_interval: parse(&lookup, "AUTH_SWEEP_INTERVAL_SECS")?
                .map_or(d.sweep_interval, StdDuration::from_secs),
            api_key_pepper: lookup("AUTH_API_KEY_PEPPER").unwrap_or(d.api_key_pepper),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("access TTL", self.access_ttl),
            ("refresh TTL", self.refresh_ttl),
            ("attempt window", self.attempt_window),
            ("lockout duration", self.lockout.lock_duration),
            ("rate limit window", self.rate_limit_window),
            ("password reset TTL", self.password_reset_ttl),
            ("email verification TTL", self.email_verify_ttl),
        ];
        for (name, value) in positive {
            if value <= Duration::zero() {
                return Err(ConfigError::ValidationError(format!("{name} must be positive")));
            }
        }
        if self.refresh_ttl < self.access_ttl {
            return Err(ConfigError::ValidationError(
                "refresh TTL must not be shorter than access TTL".into(),
            ));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::ValidationError(
                "bcrypt cost must be between 4 and 31".into(),
            ));
        }
        if self.lockout.max_failures == 0 || self.rate_limit_max == 0 {
            return Err(ConfigError::ValidationError(
                "failure thresholds must be at least 1".into(),
            ));
        }
        if self.store_timeout.is_zero() || self.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "store timeout and sweep interval must be positive".into(),
            ));
        }
        if self.api_key_pepper.is_empty() {
            return Err(ConfigError::ValidationError(
                "API key pepper must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Whether the API key pepper is still the development default.
    pub fn uses_dev_pepper(&self) -> bool {
        self.api_key_pepper == DEV_API_KEY_PEPPER
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AuthConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.access_ttl, Duration::minutes(15));
        assert_eq!(config.refresh_ttl, Duration::days(7));
        assert_eq!(config.lockout.max_failures, 5);
        assert_eq!(config.rate_limit_max, 20);
        assert_eq!(config.store_timeout, StdDuration::from_millis(2000));
        assert!(config.uses_dev_pepper());
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_pairs(&[
            ("AUTH_ACCESS_TTL_SECS", "60"),
            ("AUTH_BCRYPT_COST", "12"),
            ("AUTH_LOCKOUT_MAX_FAILURES", "3"),
            ("AUTH_STORE_TIMEOUT_MS", " 500 "),
            ("AUTH_API_KEY_PEPPER", "prod-pepper"),
        ])
        .unwrap();
        assert_eq!(config.access_ttl, Duration::seconds(60));
        assert_eq!(config.bcrypt_cost, 12);
        assert_eq!(config.lockout.max_failures, 3);
        assert_eq!(config.store_timeout, StdDuration::from_millis(500));
        assert!(!config.uses_dev_pepper());
    }

    #[test]
    fn unparsable_value_names_the_variable() {
        match from_pairs(&[("AUTH_RATE_LIMIT_MAX", "lots")]) {
            Err(ConfigError::Invalid { key, value }) => {
                assert_eq!(key, "AUTH_RATE_LIMIT_MAX");
                assert_eq!(value, "lots");
            }
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn nonsensical_settings_are_rejected() {
        for pairs in [
            [("AUTH_ACCESS_TTL_SECS", "0")],
            [("AUTH_BCRYPT_COST", "3")],
            [("AUTH_LOCKOUT_MAX_FAILURES", "0")],
            [("AUTH_REFRESH_TTL_SECS", "10")],
            [("AUTH_STORE_TIMEOUT_MS", "0")],
        ] {
            assert!(
                matches!(from_pairs(&pairs), Err(ConfigError::ValidationError(_))),
                "{pairs:?} should be rejected"
            );
        }
    }
}

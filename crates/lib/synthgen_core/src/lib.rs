//! # synthgen_core
//!
//! Credential lifecycle engine for Synthgen: password hashing, session
//! tokens, revocation, brute-force mitigation, one-time tokens and API keys.

pub mod auth;
pub mod clock;
pub mod config;
pub mod migrate;
pub mod models;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}

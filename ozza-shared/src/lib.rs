//! # Ozza shared library
//!
//! Domain types, persistence and business rules used by the Ozza API server.
//!
//! ## Module Organization
//!
//! - `db`: connection pool, migrations, retry policy
//! - `models`: database models and their queries
//! - `auth`: passwords, session tokens, request authentication, authorization
//! - `onboarding`: signup, invitation chains and community links
//! - `quota`: plan caps and usage metering
//! - `payments`: payments provider (checkout, portal, callbacks)
//! - `webhooks`: outbound webhook signing and delivery

pub mod auth;
pub mod db;
pub mod models;
pub mod onboarding;
pub mod payments;
pub mod quota;
pub mod webhooks;

/// Current version of the Ozza shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

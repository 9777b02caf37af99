//! Bearer-token authentication for the coordinator.
//!
//! The coordinator only consumes tokens; issuing them is somebody else's job.
//! Authentication is optional:
//!
//! - **Disabled**: no tokens configured, every request is accepted
//! - **Bearer**: requests must carry `Authorization: Bearer <token>` with one
//!   of the configured tokens
//!
//! Tokens are compared in constant time.
//!
//! # Example
//!
//! ```
//! use toolmesh_common::auth::{AuthConfig, extract_bearer_token};
//!
//! let auth = AuthConfig::with_tokens(["s3cret"]);
//! let token = extract_bearer_token(Some("Bearer s3cret"));
//! assert!(auth.validate_token(token));
//! assert!(!auth.validate_token(None));
//! ```

use std::fmt;

use crate::config::AuthSettings;

/// Authentication configuration for the coordinator.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    tokens: Vec<String>,
}

impl AuthConfig {
    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn disabled() -> Self {
        Self { tokens: Vec::new() }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::with_tokens(settings.tokens.iter().cloned())
    }

    pub fn requires_auth(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Checks a presented token. Always `true` when auth is disabled.
    pub fn validate_token(&self, provided: Option<&str>) -> bool {
        if !self.requires_auth() {
            return true;
        }
        let Some(provided) = provided else {
            return false;
        };

        // No early exit: every configured token is compared.
        self.tokens
            .iter()
            .fold(false, |matched, expected| matched | constant_time_eq(expected, provided))
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requires_auth() {
            write!(f, "Bearer({} tokens)", self.tokens.len())
        } else {
            write!(f, "Disabled")
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// Pulls the token out of an `Authorization` header value.
///
/// The scheme is matched case-insensitively; anything other than `Bearer`
/// yields `None`.
pub fn extract_bearer_token(header_value: Option<&str>) -> Option<&str> {
    let value = header_value?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_with_tokens() {
        let auth = AuthConfig::with_tokens(["alpha", "beta"]);
        assert!(auth.requires_auth());
        assert!(auth.validate_token(Some("alpha")));
        assert!(auth.validate_token(Some("beta")));
        assert!(!auth.validate_token(Some("gamma")));
        assert!(!auth.validate_token(None));
    }

    #[test]
    fn test_auth_disabled() {
        let auth = AuthConfig::disabled();
        assert!(!auth.requires_auth());
        assert!(auth.validate_token(None));
        assert!(auth.validate_token(Some("anything")));
    }

    #[test]
    fn test_auth_from_settings() {
        let settings = AuthSettings { tokens: vec!["t1".into()] };
        assert!(AuthConfig::from_settings(&settings).validate_token(Some("t1")));
        assert!(!AuthConfig::from_settings(&AuthSettings::default()).requires_auth());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same-key-123", "same-key-123"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("key1", "key2"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer_token(Some("bearer   abc  ")), Some("abc"));
        assert_eq!(extract_bearer_token(Some("Basic dXNlcjpwdw==")), None);
        assert_eq!(extract_bearer_token(Some("Bearer ")), None);
        assert_eq!(extract_bearer_token(Some("abc")), None);
        assert_eq!(extract_bearer_token(None), None);
    }

    #[test]
    fn test_display_hides_tokens() {
        let auth = AuthConfig::with_tokens(["secret"]);
        assert_eq!(auth.to_string(), "Bearer(1 tokens)");
        assert_eq!(AuthConfig::disabled().to_string(), "Disabled");
    }
}

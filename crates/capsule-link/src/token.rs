//! Credential format validation.
//!
//! Tokens are checked before any network activity so that a malformed
//! credential fails with [`RegistryError::InvalidTokenFormat`] instead of an
//! opaque handshake rejection.

use crate::error::{RegistryError, RegistryResult};

/// The only whitespace-bearing form a token may take.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Validate a credential and return its bare form.
///
/// A token is accepted when, after stripping an optional `Bearer ` prefix,
/// it contains no whitespace and splits on `.` into exactly three non-empty
/// segments.
///
/// # Example
///
/// ```
/// use capsule_link::token::validate_token;
///
/// assert_eq!(validate_token("Bearer a.b.c").unwrap(), "a.b.c");
/// assert!(validate_token("not-a-jwt").is_err());
/// ```
pub fn validate_token(raw: &str) -> RegistryResult<&str> {
    if raw.is_empty() {
        return Err(RegistryError::invalid_token("token is empty"));
    }

    let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw);

    if token.chars().any(char::is_whitespace) {
        return Err(RegistryError::invalid_token(
            "token contains whitespace outside the `Bearer ` prefix",
        ));
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(RegistryError::invalid_token(format!(
            "expected 3 dot-separated segments, found {}",
            segments.len()
        )));
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RegistryError::invalid_token("token has an empty segment"));
    }

    Ok(token)
}

/// Render the `Authorization` header value for a bare token.
pub fn authorization_value(token: &str) -> String {
    format!("{BEARER_PREFIX}{token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_three_segments() {
        assert_eq!(validate_token("a.b.c").unwrap(), "a.b.c");
    }

    #[test]
    fn test_strips_bearer_prefix() {
        assert_eq!(validate_token("Bearer x.y.z").unwrap(), "x.y.z");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            validate_token(""),
            Err(RegistryError::InvalidTokenFormat { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_segment_count() {
        assert!(validate_token("not-a-jwt").is_err());
        assert!(validate_token("a.b").is_err());
        assert!(validate_token("a.b.c.d").is_err());
    }

    #[test]
    fn test_rejects_empty_segment() {
        assert!(validate_token("a..c").is_err());
        assert!(validate_token(".b.c").is_err());
    }

    #[test]
    fn test_rejects_embedded_space() {
        assert!(validate_token("a.b c.d").is_err());
        assert!(validate_token("bearer a.b.c").is_err());
        assert!(validate_token("Bearer  a.b.c").is_err());
    }

    #[test]
    fn test_authorization_value() {
        assert_eq!(authorization_value("a.b.c"), "Bearer a.b.c");
    }

    proptest! {
        #[test]
        fn prop_well_formed_tokens_accepted(
            a in "[A-Za-z0-9_-]{1,24}",
            b in "[A-Za-z0-9_-]{1,24}",
            c in "[A-Za-z0-9_-]{1,24}",
        ) {
            let token = format!("{a}.{b}.{c}");
            prop_assert_eq!(validate_token(&token).unwrap(), token.as_str());
            let bearer = format!("Bearer {token}");
            prop_assert_eq!(validate_token(&bearer).unwrap(), token.as_str());
        }

        #[test]
        fn prop_dotless_tokens_rejected(raw in "[A-Za-z0-9_-]{0,48}") {
            prop_assert!(validate_token(&raw).is_err());
        }
    }
}

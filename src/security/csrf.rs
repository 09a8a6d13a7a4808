//! CSRF token handling
//!
//! Tokens are 24 random bytes rendered as 48 hex characters. Validation only
//! checks the shape of the token and that the caller holds a session; the
//! token is not bound to the session it was issued for.

use crate::error::Result;
use crate::security::credentials::generate_secure_token;

/// Header carrying the CSRF token on unsafe requests
pub const CSRF_HEADER: &str = "x-csrf-token";

pub const CSRF_TOKEN_BYTES: usize = 24;

/// Rendered length of a valid token
pub const CSRF_TOKEN_LENGTH: usize = CSRF_TOKEN_BYTES * 2;

pub fn generate_csrf_token() -> Result<String> {
    generate_secure_token(CSRF_TOKEN_BYTES)
}

pub fn validate_csrf_token(token: &str, session_token: &str) -> bool {
    token.len() == CSRF_TOKEN_LENGTH && !session_token.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_validates() {
        let token = generate_csrf_token().unwrap();
        assert_eq!(token.len(), CSRF_TOKEN_LENGTH);
        assert!(validate_csrf_token(&token, "access-token"));
    }

    #[test]
    fn test_any_48_char_token_passes() {
        let token = "z".repeat(48);
        assert!(validate_csrf_token(&token, "access-token"));
    }

    #[test]
    fn test_wrong_length_fails() {
        assert!(!validate_csrf_token(&"a".repeat(47), "access-token"));
        assert!(!validate_csrf_token(&"a".repeat(49), "access-token"));
        assert!(!validate_csrf_token("", "access-token"));
    }

    #[test]
    fn test_empty_session_token_fails() {
        assert!(!validate_csrf_token(&"a".repeat(48), ""));
    }
}

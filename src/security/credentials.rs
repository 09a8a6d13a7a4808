//! Credential Tools
//!
//! Secure token generation, salted password digests and password strength
//! scoring. Everything here is synchronous; `SecurityService` moves the work
//! onto the blocking pool.

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

/// Default number of random bytes in an access or refresh token
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Random bytes in a generated salt
pub const SALT_BYTES: usize = 16;

/// Minimum password length in characters
pub const MIN_PASSWORD_LENGTH: usize = 8;

const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Substrings that make a password trivially guessable
const COMMON_PATTERNS: [&str; 10] = [
    "123456", "password", "qwerty", "admin", "letmein", "abc123", "iloveyou", "monkey", "dragon",
    "football",
];

const COMMON_PATTERN_PENALTY: u8 = 2;

/// Salted password digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
}

/// Result of a password strength check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordAssessment {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// 0..=5
    pub score: u8,
}

/// Generate `length` bytes from the OS CSPRNG, hex encoded (`2 * length` chars).
pub fn generate_secure_token(length: usize) -> Result<String> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::Internal(format!("secure random generation failed: {}", e)))?;
    Ok(hex::encode(bytes))
}

/// Hash `password` with `salt`, generating a fresh salt when none is given.
pub fn hash_password(password: &str, salt: Option<&str>) -> Result<PasswordHash> {
    let salt = match salt {
        Some(salt) => salt.to_string(),
        None => generate_secure_token(SALT_BYTES)?,
    };

    Ok(PasswordHash {
        hash: digest(password, &salt),
        salt,
    })
}

/// Recompute the digest for `password` and compare it with `hash`.
pub fn verify_password(password: &str, hash: &str, salt: &str) -> bool {
    digest(password, salt)
        .as_bytes()
        .ct_eq(hash.as_bytes())
        .into()
}

fn digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Score a password against the five character-class rules and the
/// common-pattern denylist.
pub fn validate_password_strength(password: &str) -> PasswordAssessment {
    let mut errors = Vec::new();
    let mut score: u8 = 0;

    let checks = [
        (
            password.chars().count() >= MIN_PASSWORD_LENGTH,
            format!("Password must be at least {} characters long", MIN_PASSWORD_LENGTH),
        ),
        (
            password.chars().any(|c| c.is_uppercase()),
            "Password must contain at least one uppercase letter".to_string(),
        ),
        (
            password.chars().any(|c| c.is_lowercase()),
            "Password must contain at least one lowercase letter".to_string(),
        ),
        (
            password.chars().any(|c| c.is_ascii_digit()),
            "Password must contain at least one number".to_string(),
        ),
        (
            password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)),
            "Password must contain at least one special character".to_string(),
        ),
    ];

    for (passed, message) in checks {
        if passed {
            score += 1;
        } else {
            errors.push(message);
        }
    }

    let lowered = password.to_lowercase();
    if COMMON_PATTERNS.iter().any(|pattern| lowered.contains(pattern)) {
        errors.push("Password contains common patterns and is easily guessable".to_string());
        score = score.saturating_sub(COMMON_PATTERN_PENALTY);
    }

    PasswordAssessment {
        is_valid: errors.is_empty(),
        errors,
        score,
    }
}

//! Request Validation Module
//!
//! Field validation for the account endpoints and markup stripping for the
//! input sanitizer guard. Stripping is a second line of defence; output
//! encoding remains the client's job.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

static JAVASCRIPT_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("valid scheme regex"));

/// Inline handler attributes such as `onclick=` or `onerror =`
static EVENT_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").expect("valid handler regex"));

/// Request validator
#[derive(Debug, Clone)]
pub struct RequestValidator {
    /// Maximum allowed field length
    max_field_length: usize,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestValidator {
    pub fn new() -> Self {
        Self {
            max_field_length: 10_000,
        }
    }

    /// Set maximum field length
    pub fn with_max_field_length(mut self, length: usize) -> Self {
        self.max_field_length = length;
        self
    }

    /// Validate field length in characters
    pub fn validate_length(
        &self,
        field: &str,
        value: &str,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Result<()> {
        let length = value.chars().count();

        if let Some(min_len) = min {
            if length < min_len {
                return Err(AppError::validation(
                    format!("Field '{}' is too short (min: {}, got: {})", field, min_len, length),
                    Some(field),
                ));
            }
        }

        let max_len = max.unwrap_or(self.max_field_length);
        if length > max_len {
            return Err(AppError::validation(
                format!("Field '{}' is too long (max: {}, got: {})", field, max_len, length),
                Some(field),
            ));
        }

        Ok(())
    }

    /// Validate email format
    pub fn validate_email(&self, field: &str, value: &str) -> Result<()> {
        self.validate_length(field, value, Some(3), Some(254))?;
        if EMAIL_REGEX.is_match(value) {
            Ok(())
        } else {
            Err(AppError::validation(
                format!("Field '{}' is not a valid email", field),
                Some(field),
            ))
        }
    }

    /// Require a non-blank value
    pub fn validate_required(&self, field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            Err(AppError::validation(
                format!("Required field '{}' is missing", field),
                Some(field),
            ))
        } else {
            Ok(())
        }
    }
}

/// Remove angle brackets, `javascript:` schemes and inline event handlers.
pub fn strip_markup(input: &str) -> String {
    let without_brackets: String = input.chars().filter(|c| *c != '<' && *c != '>').collect();
    let without_scheme = JAVASCRIPT_SCHEME.replace_all(&without_brackets, "");
    EVENT_HANDLER.replace_all(&without_scheme, "").into_owned()
}

/// Apply [`strip_markup`] to every string in a JSON document, in place.
pub fn sanitize_json_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            let cleaned = strip_markup(s);
            if cleaned != *s {
                *s = cleaned;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_json_value),
        Value::Object(map) => map.values_mut().for_each(sanitize_json_value),
        _ => {}
    }
}

/// Sanitize every key and value of a raw query string.
///
/// Pairs without markup are kept byte for byte; only pairs that
/// [`strip_markup`] changed are re-encoded.
pub fn sanitize_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(raw_key);
            let value = decode_component(raw_value);
            let clean_key = strip_markup(&key);
            let clean_value = strip_markup(&value);

            if clean_key == key && clean_value == value {
                pair.to_string()
            } else {
                format!(
                    "{}={}",
                    urlencoding::encode(&clean_key),
                    urlencoding::encode(&clean_value)
                )
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

//! Key, tag and namespace validation.

use crate::constants::RESERVED_CHARACTERS;
use crate::errors::{CacheError, CacheResult};

/// Validate a logical cache key.
///
/// Keys must be non-empty and free of [`RESERVED_CHARACTERS`], which
/// backends use as structural delimiters.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] when the key is empty or contains a
/// reserved character.
///
/// # Example
///
/// ```
/// use cachette_domain::validate_key;
///
/// assert!(validate_key("user.42").is_ok());
/// assert!(validate_key("user:42").is_err());
/// assert!(validate_key("").is_err());
/// ```
pub fn validate_key(key: &str) -> CacheResult<&str> {
    if key.is_empty() {
        return Err(CacheError::invalid_key(key, "cache key length must be greater than zero"));
    }
    if let Some(c) = key.chars().find(|c| RESERVED_CHARACTERS.contains(*c)) {
        return Err(CacheError::invalid_key(
            key,
            format!("contains reserved character \"{c}\" (reserved: {RESERVED_CHARACTERS})"),
        ));
    }
    Ok(key)
}

/// Validate a pool namespace.
///
/// An empty namespace is allowed. Otherwise only `[-+_.A-Za-z0-9]` may
/// appear.
///
/// # Errors
///
/// Returns [`CacheError::InvalidNamespace`] naming the first offending
/// character.
pub fn validate_namespace(namespace: &str) -> CacheResult<&str> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_' | '.');
    match namespace.chars().find(|c| !allowed(*c)) {
        Some(character) => {
            Err(CacheError::InvalidNamespace { namespace: namespace.to_string(), character })
        }
        None => Ok(namespace),
    }
}

//! Logical key to effective storage identifier.
//!
//! An effective id is `namespace || version || key`. When that exceeds the
//! store's identifier limit the key is replaced by a truncated 128-bit
//! hash ending in the namespace separator. Valid keys never contain the
//! separator, so hashed ids cannot collide with plain ones.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cachette_domain::constants::{ID_CACHE_MAX_ENTRIES, ID_CACHE_TRIM_TO, NAMESPACE_SEPARATOR};
use cachette_domain::{validate_key, CacheResult};
use lru::LruCache;

/// Length a hashed id adds after the namespace, version included.
///
/// A namespace (separator included) longer than `max_id_length` minus
/// this cannot hold a hashed id.
pub const HASHED_ID_LEN: usize = 23;

/// Resolves logical keys for one pool and memoizes the result.
#[derive(Debug)]
pub struct KeyResolver {
    namespace: String,
    max_id_length: Option<usize>,
    // key -> (version length the suffix was computed for, suffix)
    ids: LruCache<String, (usize, String)>,
}

impl KeyResolver {
    /// `namespace` must already carry its trailing separator (or be empty).
    pub fn new(namespace: impl Into<String>, max_id_length: Option<usize>) -> Self {
        Self { namespace: namespace.into(), max_id_length, ids: LruCache::unbounded() }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Effective id of `key` under `version` (empty when unversioned).
    ///
    /// # Errors
    ///
    /// [`cachette_domain::CacheError::InvalidKey`] for an invalid key.
    pub fn resolve(&mut self, key: &str, version: &str) -> CacheResult<String> {
        if let Some((version_len, suffix)) = self.ids.get(key) {
            if *version_len == version.len() {
                return Ok(format!("{}{version}{suffix}", self.namespace));
            }
        }

        validate_key(key)?;
        let plain_len = self.namespace.len() + version.len() + key.len();
        let suffix = match self.max_id_length {
            Some(max) if plain_len > max => hashed_suffix(key, version.len()),
            _ => key.to_string(),
        };
        let id = format!("{}{version}{suffix}", self.namespace);
        self.remember(key, version.len(), suffix);
        Ok(id)
    }

    /// Forget every memoized id.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.ids.len()
    }

    fn remember(&mut self, key: &str, version_len: usize, suffix: String) {
        self.ids.put(key.to_string(), (version_len, suffix));
        if self.ids.len() > ID_CACHE_MAX_ENTRIES {
            while self.ids.len() > ID_CACHE_TRIM_TO {
                self.ids.pop_lru();
            }
        }
    }
}

/// Fixed-width replacement for an over-long key.
///
/// The tail of the encoded hash is shortened by the version length so the
/// final id length does not depend on whether versioning is enabled.
fn hashed_suffix(key: &str, version_len: usize) -> String {
    let digest = blake3::hash(key.as_bytes());
    let encoded = STANDARD.encode(&digest.as_bytes()[..16]);
    let keep = encoded.len().saturating_sub(version_len + 2);
    let mut suffix = encoded[..keep].to_string();
    suffix.push(NAMESPACE_SEPARATOR);
    suffix
}

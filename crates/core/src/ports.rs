//! Storage and serialization ports.
//!
//! A [`Store`] is the minimal operation set every backend exposes: fetch
//! many, has, save many with a TTL, delete many, clear by prefix and an
//! optional prune. It works on effective storage identifiers and opaque
//! byte payloads; namespacing, versioning and value encoding are the
//! pool's business.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use cachette_core::{Store, StoreResult};
//!
//! fn warm(store: &dyn Store) -> StoreResult<bool> {
//!     let values = [("app:greeting".to_string(), b"hi".to_vec())];
//!     let failed = store.save_many(&values, Duration::ZERO)?;
//!     Ok(failed.is_empty())
//! }
//! ```

use std::time::Duration;

use cachette_common::{ErrorClassification, ErrorSeverity};
use cachette_domain::CacheError;
use thiserror::Error;

/// Failure reported by a [`Store`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{backend} backend error: {message}")]
    Backend { backend: &'static str, message: String, retryable: bool },

    /// Nothing can be served in a degraded way, e.g. the cache directory
    /// is not writable.
    #[error("structural storage failure: {0}")]
    Structural(String),

    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::Backend`].
    pub fn backend(backend: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend { backend, message: message.into(), retryable }
    }
}

impl ErrorClassification for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            Self::Backend { retryable, .. } => *retryable,
            Self::Structural(_) | Self::Corrupt(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Structural(_) => ErrorSeverity::Critical,
            Self::Corrupt(_) => ErrorSeverity::Error,
            _ if self.is_retryable() => ErrorSeverity::Warning,
            Self::Io(_) | Self::Backend { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(message) => Self::Serialization(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Port for a key/value storage backend.
///
/// Identifiers handed to a store are already namespaced, versioned and
/// length-limited. Implementations must be safe to share between threads;
/// cross-process consistency is whatever the backend itself provides.
pub trait Store: Send + Sync {
    /// Backend discriminator used in logs (`cache_adapter` field).
    fn name(&self) -> &'static str;

    /// Fetch the live entries among `ids`.
    ///
    /// Misses and expired entries are omitted. The returned order is the
    /// backend's fetch order.
    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// True iff `id` is present and unexpired.
    fn has(&self, id: &str) -> StoreResult<bool>;

    /// Write every entry with the same `ttl` (whole seconds, zero meaning
    /// forever).
    ///
    /// Each id is written atomically. Returns the ids that failed; an
    /// `Err` is reserved for failures affecting the whole call.
    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>>;

    /// Delete `ids`. Deleting an absent id succeeds.
    fn delete_many(&self, ids: &[String]) -> StoreResult<bool>;

    /// Delete every entry whose id starts with `prefix`. An empty prefix
    /// clears everything this store can reach.
    fn clear(&self, prefix: &str) -> StoreResult<bool>;

    /// Proactively remove expired entries.
    ///
    /// Backends with native expiration keep the default no-op.
    fn prune(&self) -> StoreResult<bool> {
        Ok(true)
    }

    /// Longest identifier the backend accepts, if bounded.
    fn max_id_length(&self) -> Option<usize> {
        None
    }

    /// Whether prefix clears are unsafe, forcing pools onto namespace
    /// versioning.
    fn requires_versioning(&self) -> bool {
        false
    }
}

/// Port for turning values into bytes and back.
///
/// `unmarshall` must only ever build a `V`; payloads that decode to
/// anything else are a [`CacheError::Serialization`].
pub trait Marshaller<V>: Send + Sync {
    /// Encode a value.
    ///
    /// # Errors
    ///
    /// [`CacheError::Serialization`] when the value cannot be encoded.
    fn marshall(&self, value: &V) -> Result<Vec<u8>, CacheError>;

    /// Decode a value.
    ///
    /// # Errors
    ///
    /// [`CacheError::Serialization`] when the payload is malformed.
    fn unmarshall(&self, bytes: &[u8]) -> Result<V, CacheError>;
}

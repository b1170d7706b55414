//! Error types surfaced to cache callers
//!
//! Only errors a caller can act on reach this type. Transient backend
//! failures are logged and degraded inside the pool (a miss, `false`), so
//! [`CacheError::Storage`] is reserved for structural failures such as an
//! unwritable cache directory at construction time.

use cachette_common::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid cache key \"{key}\": {reason}")]
    InvalidKey { key: String, reason: String },

    #[error(
        "namespace \"{namespace}\" contains \"{character}\" \
         but only characters in [-+_.A-Za-z0-9] are allowed"
    )]
    InvalidNamespace { namespace: String, character: char },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Build an [`CacheError::InvalidKey`] for `key`.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into(), reason: reason.into() }
    }

    /// Whether this error reports a bug in the calling code.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. } | Self::InvalidNamespace { .. } | Self::InvalidArgument(_)
        )
    }
}

impl ErrorClassification for CacheError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidKey { .. } | Self::InvalidNamespace { .. } | Self::InvalidArgument(_) => {
                ErrorSeverity::Error
            }
            Self::Serialization(_) => ErrorSeverity::Warning,
            Self::Storage(_) | Self::Config(_) => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Config(_))
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

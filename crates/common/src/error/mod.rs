//! Error classification shared by every cachette error type
//!
//! The cache core distinguishes two families of failure: programming errors
//! that must reach the caller (invalid keys, invalid arguments) and
//! environment errors that are logged and degraded into a miss or a `false`
//! return value. Both families implement [`ErrorClassification`] so the code
//! that swallows an error can still log it with an appropriate severity.
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Missing entry, expired entry |
//! | **Warning** | Degraded but operational | Backend timeout, lock contention |
//! | **Error** | Failure requiring attention | Corrupt payload, invalid input |
//! | **Critical** | Cache unusable | Unwritable cache directory, uncreatable table |

use std::fmt;

/// Standard interface for classifying errors by their characteristics
///
/// # Example
///
/// ```
/// use cachette_common::{ErrorClassification, ErrorSeverity};
///
/// #[derive(Debug)]
/// enum ProbeError {
///     Timeout,
///     Corrupt,
/// }
///
/// impl ErrorClassification for ProbeError {
///     fn is_retryable(&self) -> bool {
///         matches!(self, Self::Timeout)
///     }
///
///     fn severity(&self) -> ErrorSeverity {
///         match self {
///             Self::Timeout => ErrorSeverity::Warning,
///             Self::Corrupt => ErrorSeverity::Error,
///         }
///     }
///
///     fn is_critical(&self) -> bool {
///         false
///     }
/// }
///
/// assert!(ProbeError::Timeout.is_retryable());
/// assert_eq!(ProbeError::Corrupt.severity(), ErrorSeverity::Error);
/// ```
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as a busy database or a dropped connection.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for logging and alerting decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

//! Conversions from backend client errors into [`StoreError`].
//!
//! Core never depends on client crates, so the mapping lives on the
//! infrastructure side. Orphan rules rule out `From` impls here, hence the
//! extension trait.

use cachette_core::StoreError;
use rusqlite::Error as SqlError;

/// Convert a client error into a [`StoreError`] tagged with its backend.
pub trait IntoStoreError {
    /// Perform the conversion.
    fn into_store_error(self) -> StoreError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → StoreError */
/* -------------------------------------------------------------------------- */

impl IntoStoreError for SqlError {
    fn into_store_error(self) -> StoreError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => {
                        StoreError::backend("sqlite", "database is busy", true)
                    }
                    ErrorCode::DatabaseLocked => {
                        StoreError::backend("sqlite", "database is locked", true)
                    }
                    ErrorCode::ReadOnly | ErrorCode::CannotOpen | ErrorCode::PermissionDenied => {
                        StoreError::Structural(format!("sqlite database unusable: {message}"))
                    }
                    ErrorCode::DiskFull => StoreError::Structural("sqlite disk full".into()),
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                        StoreError::Structural(format!(
                            "sqlite file is not a usable database: {message}"
                        ))
                    }
                    _ => StoreError::backend(
                        "sqlite",
                        format!(
                            "sqlite failure {:?} (code {}): {}",
                            err.code, err.extended_code, message
                        ),
                        false,
                    ),
                }
            }
            RE::FromSqlConversionFailure(_, _, cause) => {
                StoreError::Corrupt(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                StoreError::Corrupt(format!("invalid column type: {ty}"))
            }
            RE::InvalidPath(path) => {
                StoreError::Structural(format!("invalid database path: {}", path.to_string_lossy()))
            }
            other => StoreError::backend("sqlite", other.to_string(), false),
        }
    }
}

/// True when a statement failed because the cache table does not exist yet.
pub fn is_missing_table(err: &SqlError) -> bool {
    match err {
        SqlError::SqliteFailure(_, Some(message)) => message.contains("no such table"),
        other => other.to_string().contains("no such table"),
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → StoreError */
/* -------------------------------------------------------------------------- */

impl IntoStoreError for r2d2::Error {
    fn into_store_error(self) -> StoreError {
        // r2d2 only reports checkout timeouts and connection failures.
        StoreError::backend("sqlite", format!("connection pool: {self}"), true)
    }
}

/* -------------------------------------------------------------------------- */
/* redis::RedisError → StoreError */
/* -------------------------------------------------------------------------- */

#[cfg(feature = "redis")]
impl IntoStoreError for redis::RedisError {
    fn into_store_error(self) -> StoreError {
        let retryable = self.is_timeout()
            || self.is_connection_dropped()
            || self.is_connection_refusal()
            || self.is_io_error();
        StoreError::backend("redis", self.to_string(), retryable)
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

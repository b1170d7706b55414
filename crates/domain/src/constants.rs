//! Cache-wide constants
//!
//! Centralized location for the structural characters and limits every
//! layer of the cache agrees on.

/// Characters a logical key or tag may not contain.
pub const RESERVED_CHARACTERS: &str = "{}()/\\@:";

/// Separator appended to a non-empty namespace and used to build the
/// reserved identifier holding the namespace version token.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Identifier cache size that triggers a trim.
pub const ID_CACHE_MAX_ENTRIES: usize = 1000;

/// Entries kept after the identifier cache is trimmed.
pub const ID_CACHE_TRIM_TO: usize = 500;

/// Default weight of probabilistic early expiration.
pub const DEFAULT_BETA: f64 = 1.0;

// Relational backend defaults
pub const DEFAULT_TABLE: &str = "cache_items";
pub const DEFAULT_ID_COL: &str = "item_id";
pub const DEFAULT_DATA_COL: &str = "item_data";
pub const DEFAULT_LIFETIME_COL: &str = "item_lifetime";
pub const DEFAULT_TIME_COL: &str = "item_time";
pub const SQL_MAX_ID_LENGTH: usize = 255;
pub const DEFAULT_SQLITE_POOL_SIZE: u32 = 4;
pub const DEFAULT_SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

// External key-value server
pub const REDIS_SCAN_COUNT: usize = 1000;

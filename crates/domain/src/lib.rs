//! # cachette domain
//!
//! Value types shared by every layer of the cache.
//!
//! This crate contains:
//! - [`CacheItem`] and its stored [`ItemMetadata`]
//! - Key, tag and namespace validation rules
//! - [`CacheError`], the error surfaced to cache callers
//! - Configuration structures for pools and storage backends
//!
//! ## Architecture
//! - Depends only on `cachette-common`
//! - No I/O, no backend client crates

pub mod config;
pub mod constants;
pub mod errors;
pub mod item;
pub mod key;

pub use config::{
    BackendConfig, CacheSettings, FilesystemConfig, MemoryConfig, PoolConfig, PoolConfigBuilder,
    RedisConfig, SqliteConfig, UpsertStrategy,
};
pub use errors::{CacheError, CacheResult};
pub use item::{CacheItem, Expiry, ItemMetadata};
pub use key::{validate_key, validate_namespace};

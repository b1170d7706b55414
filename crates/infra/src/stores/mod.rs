//! Storage backends and the factory selecting one from configuration.
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | filesystem | [`FilesystemStore`] | one file per entry, atomic rename |
//! | sqlite | [`SqliteStore`] | pooled connections, 255 character ids |
//! | memory | [`MemoryStore`] | single process, optional LRU bound |
//! | redis | `RedisStore` | native TTL, cluster forces versioning |
//!
//! Selection is explicit: [`Backend::open`] builds exactly the variant named
//! by [`BackendConfig`] and never probes the environment.

pub mod filesystem;
pub mod lazy;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod sqlite;

use std::sync::Arc;

use cachette_common::{Clock, SystemClock};
use cachette_core::Store;
use cachette_domain::{BackendConfig, CacheResult};
use tracing::{info, instrument};

pub use self::filesystem::FilesystemStore;
pub use self::lazy::LazyStore;
pub use self::memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

/// A constructed backend, tagged by kind.
#[derive(Debug)]
pub enum Backend {
    Filesystem(FilesystemStore),
    Sqlite(SqliteStore),
    Memory(MemoryStore),
    #[cfg(feature = "redis")]
    Redis(RedisStore),
    /// Any backend whose construction was deferred to first use.
    Lazy(LazyStore),
}

impl Backend {
    /// Build the backend named by `config` with the system clock.
    ///
    /// `namespace` scopes maintenance that cannot see pool prefixes
    /// otherwise (SQL `prune`).
    ///
    /// # Errors
    ///
    /// See [`Backend::open_with_clock`].
    pub fn open(config: &BackendConfig, namespace: &str) -> CacheResult<Self> {
        Self::open_with_clock(config, namespace, Arc::new(SystemClock))
    }

    /// Build the backend named by `config`, reading time from `clock`.
    ///
    /// A Redis configuration with `lazy` set yields [`Backend::Lazy`]; the
    /// connection is made on the first operation.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Config`] for invalid options or a backend not
    ///   compiled into this build
    /// - [`CacheError::Storage`] when the backend is structurally unusable
    #[instrument(skip(config, clock), fields(backend = config.kind()))]
    pub fn open_with_clock(
        config: &BackendConfig,
        namespace: &str,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let backend = match config {
            BackendConfig::Filesystem(fs) => {
                Self::Filesystem(FilesystemStore::new(fs)?.with_clock(clock))
            }
            BackendConfig::Sqlite(sql) => {
                Self::Sqlite(SqliteStore::new(sql)?.with_clock(clock).with_namespace(namespace))
            }
            BackendConfig::Memory(mem) => Self::Memory(MemoryStore::new(mem).with_clock(clock)),
            BackendConfig::Redis(redis) => Self::open_redis(redis)?,
        };
        info!(backend = config.kind(), "Cache backend opened");
        Ok(backend)
    }

    #[cfg(feature = "redis")]
    fn open_redis(config: &cachette_domain::RedisConfig) -> CacheResult<Self> {
        if !config.lazy {
            return RedisStore::connect(config).map(Self::Redis);
        }
        let deferred = config.clone();
        let lazy = LazyStore::new("redis", move || {
            RedisStore::connect(&deferred).map(|store| Arc::new(store) as Arc<dyn Store>)
        })
        .with_requires_versioning(config.is_cluster());
        Ok(Self::Lazy(lazy))
    }

    #[cfg(not(feature = "redis"))]
    fn open_redis(_config: &cachette_domain::RedisConfig) -> CacheResult<Self> {
        Err(cachette_domain::CacheError::Config(
            "redis backend is not compiled in (enable the `redis` feature)".to_string(),
        ))
    }

    /// Short backend name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Filesystem(store) => store.name(),
            Self::Sqlite(store) => store.name(),
            Self::Memory(store) => store.name(),
            #[cfg(feature = "redis")]
            Self::Redis(store) => store.name(),
            Self::Lazy(store) => store.name(),
        }
    }

    /// Erase the variant for use by a pool.
    #[must_use]
    pub fn into_store(self) -> Arc<dyn Store> {
        match self {
            Self::Filesystem(store) => Arc::new(store),
            Self::Sqlite(store) => Arc::new(store),
            Self::Memory(store) => Arc::new(store),
            #[cfg(feature = "redis")]
            Self::Redis(store) => Arc::new(store),
            Self::Lazy(store) => Arc::new(store),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for stores.
    use cachette_domain::{CacheError, FilesystemConfig, MemoryConfig, SqliteConfig};
    use tempfile::TempDir;

    use super::*;

    /// Validates `Backend::open` for each locally available backend.
    ///
    /// Assertions:
    /// - Confirms the variant matches the configured kind.
    /// - Confirms the erased store keeps the backend name.
    #[test]
    fn test_open_each_local_backend() {
        let dir = TempDir::new().unwrap();
        let configs = [
            BackendConfig::Filesystem(FilesystemConfig { directory: dir.path().join("fs") }),
            BackendConfig::Sqlite(SqliteConfig::new(dir.path().join("cache.db"))),
            BackendConfig::Memory(MemoryConfig::default()),
        ];
        for config in &configs {
            let backend = Backend::open(config, "app").unwrap();
            assert_eq!(backend.kind(), config.kind());
            assert_eq!(backend.into_store().name(), config.kind());
        }
    }

    /// Validates `Backend::open` for a lazy Redis configuration.
    ///
    /// Assertions:
    /// - Ensures no connection is attempted at construction.
    /// - Confirms a lazy cluster store still declares versioning.
    #[test]
    #[cfg(feature = "redis")]
    fn test_lazy_redis_does_not_connect() {
        let config = cachette_domain::RedisConfig {
            dsn: "redis://127.0.0.1:1".to_string(),
            cluster_nodes: vec![
                "redis://127.0.0.1:1".to_string(),
                "redis://127.0.0.1:2".to_string(),
            ],
            lazy: true,
        };
        let backend = Backend::open(&BackendConfig::Redis(config), "").unwrap();
        assert!(matches!(backend, Backend::Lazy(_)));
        let store = backend.into_store();
        assert!(store.requires_versioning());
        assert!(store.has("k").is_err());
    }

    /// Validates `Backend::open` for an unusable filesystem directory.
    ///
    /// Assertions:
    /// - Ensures the failure surfaces as a fatal storage error.
    #[test]
    fn test_structural_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let config = BackendConfig::Filesystem(FilesystemConfig { directory: file });
        assert!(matches!(Backend::open(&config, ""), Err(CacheError::Storage(_))));
    }
}

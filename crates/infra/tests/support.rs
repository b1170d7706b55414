#![allow(dead_code)]

use std::sync::Arc;

use cachette_common::MockClock;
use cachette_core::{CachePool, JsonMarshaller, Store};
use cachette_domain::{BackendConfig, FilesystemConfig, MemoryConfig, PoolConfig, SqliteConfig};
use cachette_infra::Backend;
use tempfile::TempDir;

/// Scratch space and a shared mock clock for one backend under test.
///
/// Keeps the temporary directory alive for the duration of a test run.
pub struct TestBackend {
    pub kind: &'static str,
    pub config: BackendConfig,
    pub clock: MockClock,
    _temp_dir: TempDir,
}

impl TestBackend {
    fn new(kind: &'static str) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let config = match kind {
            "filesystem" => BackendConfig::Filesystem(FilesystemConfig {
                directory: temp_dir.path().join("fs"),
            }),
            "sqlite" => BackendConfig::Sqlite(SqliteConfig::new(temp_dir.path().join("cache.db"))),
            _ => BackendConfig::Memory(MemoryConfig::default()),
        };
        Self { kind, config, clock: MockClock::new(), _temp_dir: temp_dir }
    }

    /// Open a fresh store instance over this backend's storage.
    ///
    /// Two stores opened from the same `TestBackend` see the same data
    /// (except for the in-process backend), like two processes would.
    pub fn open_store(&self, namespace: &str) -> Arc<dyn Store> {
        Backend::open_with_clock(&self.config, namespace, Arc::new(self.clock.clone()))
            .expect("backend should open")
            .into_store()
    }

    /// Pool over an existing store, sharing this backend's clock.
    pub fn pool_over(&self, store: &Arc<dyn Store>, config: &PoolConfig) -> CachePool<String> {
        CachePool::new(Arc::clone(store), Arc::new(JsonMarshaller), config)
            .expect("pool should be created")
            .with_clock(Arc::new(self.clock.clone()))
    }

    /// Pool over a new store instance.
    pub fn pool(&self, config: &PoolConfig) -> CachePool<String> {
        self.pool_over(&self.open_store(&config.namespace), config)
    }
}

/// Every backend runnable without external services.
pub fn local_backends() -> Vec<TestBackend> {
    ["filesystem", "sqlite", "memory"].into_iter().map(TestBackend::new).collect()
}

/// Backends whose data survives across store instances.
pub fn persistent_backends() -> Vec<TestBackend> {
    ["filesystem", "sqlite"].into_iter().map(TestBackend::new).collect()
}

pub fn namespaced(namespace: &str) -> PoolConfig {
    PoolConfig::builder().namespace(namespace).build().expect("namespace should be valid")
}

pub fn versioned(namespace: &str) -> PoolConfig {
    PoolConfig::builder()
        .namespace(namespace)
        .versioning(true)
        .build()
        .expect("namespace should be valid")
}

pub fn save_value(pool: &CachePool<String>, key: &str, value: &str) -> bool {
    let mut item = pool.get_item(key).expect("key should be valid");
    item.set(value.to_string());
    pool.save(&item).expect("value should serialize")
}

pub fn value_of(pool: &CachePool<String>, key: &str) -> Option<String> {
    pool.get_item(key).expect("key should be valid").into_value()
}

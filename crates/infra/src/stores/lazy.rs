//! Deferred store construction.
//!
//! [`LazyStore`] exposes the full [`Store`] operation set but only builds
//! the real store on first use. A failed initialization is reported as a
//! retryable backend error and attempted again on the next call.

use std::sync::Arc;
use std::time::Duration;

use cachette_core::{Store, StoreError, StoreResult};
use cachette_domain::CacheResult;
use parking_lot::Mutex;
use tracing::debug;

type Init = Box<dyn Fn() -> CacheResult<Arc<dyn Store>> + Send + Sync>;

/// Store wrapper that initializes its inner store once, on demand.
///
/// Capabilities the pool reads at construction (`max_id_length`,
/// `requires_versioning`) are declared up front so that building a pool
/// does not force a connection.
pub struct LazyStore {
    name: &'static str,
    max_id_length: Option<usize>,
    requires_versioning: bool,
    init: Init,
    inner: Mutex<Option<Arc<dyn Store>>>,
}

impl LazyStore {
    /// Wrap `init`, reporting `name` until the inner store exists.
    pub fn new<F>(name: &'static str, init: F) -> Self
    where
        F: Fn() -> CacheResult<Arc<dyn Store>> + Send + Sync + 'static,
    {
        Self {
            name,
            max_id_length: None,
            requires_versioning: false,
            init: Box::new(init),
            inner: Mutex::new(None),
        }
    }

    /// Declare the identifier limit of the store `init` builds.
    #[must_use]
    pub fn with_max_id_length(mut self, max: Option<usize>) -> Self {
        self.max_id_length = max;
        self
    }

    /// Declare whether the store `init` builds needs namespace versioning.
    #[must_use]
    pub fn with_requires_versioning(mut self, required: bool) -> Self {
        self.requires_versioning = required;
        self
    }

    /// Whether the inner store has been built.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    fn store(&self) -> StoreResult<Arc<dyn Store>> {
        let mut inner = self.inner.lock();
        if let Some(store) = inner.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = (self.init)().map_err(|e| {
            StoreError::backend(self.name, format!("initialization failed: {e}"), true)
        })?;
        debug!(cache_adapter = self.name, "Lazy store initialized");
        *inner = Some(Arc::clone(&store));
        Ok(store)
    }
}

impl std::fmt::Debug for LazyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyStore")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Store for LazyStore {
    fn name(&self) -> &'static str {
        self.name
    }

    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.store()?.fetch_many(ids)
    }

    fn has(&self, id: &str) -> StoreResult<bool> {
        self.store()?.has(id)
    }

    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>> {
        self.store()?.save_many(values, ttl)
    }

    fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
        self.store()?.delete_many(ids)
    }

    fn clear(&self, prefix: &str) -> StoreResult<bool> {
        self.store()?.clear(prefix)
    }

    fn prune(&self) -> StoreResult<bool> {
        self.store()?.prune()
    }

    fn max_id_length(&self) -> Option<usize> {
        self.max_id_length
    }

    fn requires_versioning(&self) -> bool {
        self.requires_versioning
    }
}

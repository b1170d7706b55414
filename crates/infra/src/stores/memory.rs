//! In-process store.
//!
//! A plain map living as long as the process, for caching within a single
//! request or job. Nothing is shared across processes. Expiry is a
//! timestamp checked against the clock on access.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use cachette_common::{Clock, SystemClock};
use cachette_core::{Store, StoreResult};
use cachette_domain::MemoryConfig;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    expiry: Option<f64>,
}

impl Entry {
    fn is_live(&self, now: f64) -> bool {
        self.expiry.map_or(true, |at| at > now)
    }
}

/// Map-backed store with optional LRU eviction.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Build an empty store. `max_items` of `None` or zero means unbounded.
    #[must_use]
    pub fn new(config: &MemoryConfig) -> Self {
        let entries = match config.max_items.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        info!(cache_adapter = "memory", max_items = ?config.max_items, "In-process store ready");
        Self { entries: Mutex::new(entries), clock: Arc::new(SystemClock) }
    }

    /// Use `clock` for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("len", &self.len()).finish_non_exhaustive()
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let now = self.clock.epoch_secs();
        let mut entries = self.entries.lock();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match entries.get(id) {
                Some(entry) if entry.is_live(now) => {
                    found.push((id.clone(), entry.payload.clone()));
                }
                Some(_) => {
                    entries.pop(id);
                }
                None => {}
            }
        }
        Ok(found)
    }

    fn has(&self, id: &str) -> StoreResult<bool> {
        let now = self.clock.epoch_secs();
        Ok(self.entries.lock().peek(id).is_some_and(|entry| entry.is_live(now)))
    }

    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>> {
        let expiry = (!ttl.is_zero()).then(|| self.clock.epoch_secs() + ttl.as_secs_f64());
        let mut entries = self.entries.lock();
        for (id, payload) in values {
            entries.put(id.clone(), Entry { payload: payload.clone(), expiry });
        }
        Ok(Vec::new())
    }

    fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        for id in ids {
            entries.pop(id);
        }
        Ok(true)
    }

    fn clear(&self, prefix: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        if prefix.is_empty() {
            entries.clear();
            return Ok(true);
        }
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, _)| id.clone())
            .collect();
        for id in doomed {
            entries.pop(&id);
        }
        Ok(true)
    }

    fn prune(&self) -> StoreResult<bool> {
        let now = self.clock.epoch_secs();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            entries.pop(&id);
        }
        Ok(true)
    }
}

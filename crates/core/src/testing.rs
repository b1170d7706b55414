//! In-memory store with failure injection for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cachette_common::{Clock, MockClock};
use cachette_domain::PoolConfig;
use parking_lot::Mutex;

use crate::marshal::JsonMarshaller;
use crate::pool::CachePool;
use crate::ports::{Store, StoreError, StoreResult};

#[derive(Default)]
pub struct FakeStore {
    pub clock: MockClock,
    pub entries: Mutex<HashMap<String, (Vec<u8>, Option<f64>)>>,
    pub fail_fetch: AtomicBool,
    pub fail_has: AtomicBool,
    pub fail_bulk_delete: AtomicBool,
    pub fail_batch_save: AtomicBool,
    pub undeletable: Mutex<HashSet<String>>,
    pub unsavable: Mutex<HashSet<String>>,
    pub save_calls: Mutex<Vec<(usize, Duration)>>,
    pub fetch_calls: AtomicUsize,
    pub max_id_length: Option<usize>,
    pub requires_versioning: bool,
}

impl FakeStore {
    pub fn new(clock: MockClock) -> Self {
        Self { clock, ..Self::default() }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn put_raw(&self, id: &str, payload: Vec<u8>) {
        self.entries.lock().insert(id.to_string(), (payload, None));
    }

    fn is_live(&self, expiry: Option<f64>) -> bool {
        expiry.map_or(true, |at| at > self.clock.epoch_secs())
    }
}

impl Store for FakeStore {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::backend("fake", "connection refused", true));
        }
        let entries = self.entries.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                entries
                    .get(id)
                    .filter(|(_, expiry)| self.is_live(*expiry))
                    .map(|(payload, _)| (id.clone(), payload.clone()))
            })
            .collect())
    }

    fn has(&self, id: &str) -> StoreResult<bool> {
        if self.fail_has.load(Ordering::SeqCst) {
            return Err(StoreError::backend("fake", "timeout", true));
        }
        Ok(self.entries.lock().get(id).is_some_and(|(_, expiry)| self.is_live(*expiry)))
    }

    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>> {
        self.save_calls.lock().push((values.len(), ttl));
        if values.len() > 1 && self.fail_batch_save.load(Ordering::SeqCst) {
            return Err(StoreError::backend("fake", "pipeline aborted", true));
        }
        let unsavable = self.unsavable.lock();
        let expiry = (!ttl.is_zero()).then(|| self.clock.epoch_secs() + ttl.as_secs_f64());
        let mut failed = Vec::new();
        let mut entries = self.entries.lock();
        for (id, payload) in values {
            if unsavable.contains(id) {
                failed.push(id.clone());
            } else {
                entries.insert(id.clone(), (payload.clone(), expiry));
            }
        }
        Ok(failed)
    }

    fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
        if ids.len() > 1 && self.fail_bulk_delete.load(Ordering::SeqCst) {
            return Err(StoreError::backend("fake", "bulk delete rejected", false));
        }
        let undeletable = self.undeletable.lock();
        let mut entries = self.entries.lock();
        let mut ok = true;
        for id in ids {
            if undeletable.contains(id) {
                ok = false;
            } else {
                entries.remove(id);
            }
        }
        Ok(ok)
    }

    fn clear(&self, prefix: &str) -> StoreResult<bool> {
        self.entries.lock().retain(|id, _| !id.starts_with(prefix));
        Ok(true)
    }

    fn prune(&self) -> StoreResult<bool> {
        let now = self.clock.epoch_secs();
        self.entries.lock().retain(|_, (_, expiry)| expiry.map_or(true, |at| at > now));
        Ok(true)
    }

    fn max_id_length(&self) -> Option<usize> {
        self.max_id_length
    }

    fn requires_versioning(&self) -> bool {
        self.requires_versioning
    }
}

/// Pool of strings over `store`, driven by the store's clock.
pub fn pool_over(store: &Arc<FakeStore>, config: &PoolConfig) -> CachePool<String> {
    let store_port: Arc<dyn Store> = store.clone();
    CachePool::new(store_port, Arc::new(JsonMarshaller), config)
        .unwrap()
        .with_clock(Arc::new(store.clock.clone()))
}

pub fn namespaced(namespace: &str) -> PoolConfig {
    PoolConfig::builder().namespace(namespace).build().unwrap()
}

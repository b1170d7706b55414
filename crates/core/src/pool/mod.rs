//! The cache pool adapter.
//!
//! [`CachePool`] composes a [`KeyResolver`], a [`Store`] and a
//! [`Marshaller`], and keeps a deferred write buffer in front of the store.
//!
//! Backend failures never reach the caller: reads degrade to misses,
//! writes and deletes report `false`, and every swallowed error is logged
//! with a `cache_adapter` field naming the store. Invalid keys and
//! unencodable values are returned as errors.

mod buffer;
mod envelope;
mod resolver;
mod stats;
mod version;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cachette_common::{Clock, SystemClock};
use cachette_domain::constants::NAMESPACE_SEPARATOR;
use cachette_domain::{validate_key, CacheError, CacheItem, CacheResult, ItemMetadata, PoolConfig};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

pub use self::buffer::{DeferredBuffer, PendingWrite};
pub use self::resolver::{KeyResolver, HASHED_ID_LEN};
pub use self::stats::{PoolStats, PoolStatsSnapshot};
pub use self::version::{format_version, version_key};
use crate::compute::LockRegistry;
use crate::ports::{Marshaller, Store};

pub(crate) struct PoolState {
    pub(crate) buffer: DeferredBuffer,
    pub(crate) resolver: KeyResolver,
    pub(crate) versioning: bool,
    // None until fetched; failures are not memoized
    pub(crate) version: Option<String>,
}

/// A namespaced cache pool over one [`Store`].
///
/// All methods take `&self`; the buffer and version token sit behind an
/// internal lock so a pool can be shared between threads. Dropping the
/// pool commits whatever is still buffered.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use cachette_core::{CachePool, JsonMarshaller, Store, StoreResult};
/// use cachette_domain::{CacheItem, PoolConfig};
/// use parking_lot::Mutex;
///
/// #[derive(Default)]
/// struct MapStore(Mutex<HashMap<String, Vec<u8>>>);
///
/// impl Store for MapStore {
///     fn name(&self) -> &'static str { "map" }
///     fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
///         let map = self.0.lock();
///         Ok(ids.iter().filter_map(|id| map.get(id).map(|v| (id.clone(), v.clone()))).collect())
///     }
///     fn has(&self, id: &str) -> StoreResult<bool> { Ok(self.0.lock().contains_key(id)) }
///     fn save_many(
///         &self,
///         values: &[(String, Vec<u8>)],
///         _ttl: Duration,
///     ) -> StoreResult<Vec<String>> {
///         self.0.lock().extend(values.iter().cloned());
///         Ok(Vec::new())
///     }
///     fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
///         let mut map = self.0.lock();
///         ids.iter().for_each(|id| { map.remove(id); });
///         Ok(true)
///     }
///     fn clear(&self, prefix: &str) -> StoreResult<bool> {
///         self.0.lock().retain(|id, _| !id.starts_with(prefix));
///         Ok(true)
///     }
/// }
///
/// let config = PoolConfig::builder().namespace("app").build().unwrap();
/// let pool: CachePool<String> =
///     CachePool::new(Arc::new(MapStore::default()), Arc::new(JsonMarshaller), &config).unwrap();
///
/// let mut item = pool.get_item("greeting").unwrap();
/// assert!(!item.is_hit());
/// item.set("hello".to_string());
/// assert!(pool.save(&item).unwrap());
/// assert_eq!(pool.get_item("greeting").unwrap().get().map(String::as_str), Some("hello"));
/// ```
pub struct CachePool<V> {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) marshaller: Arc<dyn Marshaller<V>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: Arc<LockRegistry>,
    pub(crate) default_lifetime: Duration,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) stats: PoolStats,
}

impl<V> CachePool<V> {
    /// Build a pool over `store`.
    ///
    /// Stores that cannot clear a prefix safely force namespace versioning
    /// on regardless of `config.versioning`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidNamespace`] when the namespace has illegal
    /// characters, [`CacheError::InvalidArgument`] when it leaves no room
    /// for a hashed id within the store's identifier limit.
    pub fn new(
        store: Arc<dyn Store>,
        marshaller: Arc<dyn Marshaller<V>>,
        config: &PoolConfig,
    ) -> CacheResult<Self> {
        config.validate()?;
        let namespace = if config.namespace.is_empty() {
            String::new()
        } else {
            format!("{}{NAMESPACE_SEPARATOR}", config.namespace)
        };
        if let Some(max) = store.max_id_length() {
            if namespace.len() + HASHED_ID_LEN > max {
                return Err(CacheError::InvalidArgument(format!(
                    "namespace \"{}\" is too long for {} (at most {} characters)",
                    config.namespace,
                    store.name(),
                    max.saturating_sub(HASHED_ID_LEN + 1),
                )));
            }
        }
        let versioning = config.versioning || store.requires_versioning();
        let resolver = KeyResolver::new(namespace, store.max_id_length());

        Ok(Self {
            store,
            marshaller,
            clock: Arc::new(SystemClock),
            locks: Arc::new(LockRegistry::default()),
            default_lifetime: config.default_lifetime(),
            state: Mutex::new(PoolState {
                buffer: DeferredBuffer::default(),
                resolver,
                versioning,
                version: None,
            }),
            stats: PoolStats::default(),
        })
    }

    /// Use `clock` for expiry arithmetic.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a single-flight lock registry with other pools.
    #[must_use]
    pub fn with_lock_registry(mut self, locks: Arc<LockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    /// Namespace including its trailing separator (empty when none).
    pub fn namespace(&self) -> String {
        self.state.lock().resolver.namespace().to_string()
    }

    /// Name of the underlying store.
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Number of writes waiting for `commit`.
    pub fn deferred_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Snapshot of hit, miss, save and error counters.
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Effective storage identifier for `key`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] for an invalid key.
    pub fn resolve_id(&self, key: &str) -> CacheResult<String> {
        let mut state = self.state.lock();
        let version = self.namespace_version(&mut state);
        state.resolver.resolve(key, &version)
    }

    /// Fetch one item. Backend failures and corrupt entries become misses.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] for an invalid key.
    pub fn get_item(&self, key: &str) -> CacheResult<CacheItem<V>> {
        validate_key(key)?;
        self.flush_if_pending(std::iter::once(key));
        let id = self.resolve_id(key)?;

        let payload = match self.store.fetch_many(std::slice::from_ref(&id)) {
            Ok(found) => {
                found.into_iter().find(|(found_id, _)| *found_id == id).map(|(_, payload)| payload)
            }
            Err(e) => {
                warn!(cache_adapter = self.store.name(), key, error = %e, "Failed to fetch key");
                self.stats.record_error();
                None
            }
        };
        Ok(self.build_item(key.to_string(), payload.as_deref()))
    }

    /// Fetch several items in one backend call.
    ///
    /// Duplicate keys are yielded once. The iterator yields found entries
    /// in backend order, then misses in input order.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] if any key is invalid; nothing is fetched.
    pub fn get_items<I>(&self, keys: I) -> CacheResult<Items<'_, V>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for key in keys {
            let key = validate_key(key.as_ref())?;
            if seen.insert(key.to_string()) {
                unique.push(key.to_string());
            }
        }
        self.flush_if_pending(unique.iter().map(String::as_str));

        let ids = {
            let mut state = self.state.lock();
            let version = self.namespace_version(&mut state);
            unique
                .iter()
                .map(|k| state.resolver.resolve(k, &version))
                .collect::<CacheResult<Vec<_>>>()?
        };
        let mut key_by_id: HashMap<&str, &str> =
            ids.iter().map(String::as_str).zip(unique.iter().map(String::as_str)).collect();

        let fetched = match self.store.fetch_many(&ids) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    cache_adapter = self.store.name(),
                    keys = ?unique,
                    error = %e,
                    "Failed to fetch items"
                );
                self.stats.record_error();
                Vec::new()
            }
        };

        let mut hits = Vec::with_capacity(fetched.len());
        for (id, payload) in fetched {
            if let Some(key) = key_by_id.remove(id.as_str()) {
                hits.push((key.to_string(), payload));
            }
        }
        let remaining: HashSet<&str> = key_by_id.into_values().collect();
        let misses: Vec<String> =
            unique.iter().filter(|k| remaining.contains(k.as_str())).cloned().collect();

        Ok(Items { pool: self, hits: hits.into_iter(), misses: misses.into_iter() })
    }

    /// Whether `key` holds a live value. Backend failures report `false`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] for an invalid key.
    pub fn has_item(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        self.flush_if_pending(std::iter::once(key));
        let id = self.resolve_id(key)?;
        match self.store.has(&id) {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(
                    cache_adapter = self.store.name(),
                    key,
                    error = %e,
                    "Failed to check if key exists"
                );
                self.stats.record_error();
                Ok(false)
            }
        }
    }

    /// Remove one key from the buffer and the store.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] for an invalid key.
    pub fn delete_item(&self, key: &str) -> CacheResult<bool> {
        self.delete_items([key])
    }

    /// Remove keys from the buffer and the store.
    ///
    /// One bulk delete is attempted first. If it fails every id is retried
    /// on its own; the result is `true` only if every id ended up deleted.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] if any key is invalid; nothing is deleted.
    pub fn delete_items<I>(&self, keys: I) -> CacheResult<bool>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| validate_key(k.as_ref()).map(str::to_string))
            .collect::<CacheResult<_>>()?;

        let ids = {
            let mut state = self.state.lock();
            for key in &keys {
                state.buffer.remove(key);
            }
            let version = self.namespace_version(&mut state);
            keys.iter()
                .map(|k| state.resolver.resolve(k, &version))
                .collect::<CacheResult<Vec<_>>>()?
        };
        if ids.is_empty() {
            return Ok(true);
        }

        match self.store.delete_many(&ids) {
            Ok(true) => return Ok(true),
            Ok(false) => debug!(
                cache_adapter = self.store.name(),
                "Bulk delete failed, retrying one by one"
            ),
            Err(e) => {
                debug!(
                    cache_adapter = self.store.name(),
                    error = %e,
                    "Bulk delete failed, retrying one by one"
                );
            }
        }

        let mut ok = true;
        for (key, id) in keys.iter().zip(&ids) {
            match self.store.delete_many(std::slice::from_ref(id)) {
                Ok(true) => continue,
                Ok(false) => warn!(
                    cache_adapter = self.store.name(),
                    key = %key,
                    "Failed to delete key"
                ),
                Err(e) => warn!(
                    cache_adapter = self.store.name(),
                    key = %key,
                    error = %e,
                    "Failed to delete key"
                ),
            }
            self.stats.record_error();
            ok = false;
        }
        Ok(ok)
    }

    /// Buffer `item` and commit immediately.
    ///
    /// # Errors
    ///
    /// Same as [`Self::save_deferred`].
    pub fn save(&self, item: &CacheItem<V>) -> CacheResult<bool> {
        self.save_deferred(item)?;
        Ok(self.commit())
    }

    /// Buffer `item` until the next commit.
    ///
    /// The value is marshalled now so encoding errors reach the caller.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidKey`] for an invalid key,
    /// [`CacheError::InvalidArgument`] for an item without a value and
    /// [`CacheError::Serialization`] when the value cannot be encoded.
    pub fn save_deferred(&self, item: &CacheItem<V>) -> CacheResult<bool> {
        let value = item
            .get()
            .ok_or_else(|| {
                CacheError::InvalidArgument(format!(
                    "item \"{}\" has no value to save",
                    item.key()
                ))
            })?;
        self.defer(item, value)?;
        Ok(true)
    }

    pub(crate) fn defer(&self, item: &CacheItem<V>, value: &V) -> CacheResult<()> {
        let key = validate_key(item.key())?;
        let payload = self.marshaller.marshall(value)?;
        let write = PendingWrite {
            payload,
            expiry: item.expiry(),
            ctime_ms: item.ctime_ms(),
            tags: item.pending_tags().clone(),
        };
        self.state.lock().buffer.insert(key.to_string(), write);
        Ok(())
    }

    /// Flush the buffer to the store.
    ///
    /// Items are grouped by TTL, one save per group; ids in a failed group
    /// are retried one by one. Items whose expiry already passed are
    /// deleted instead. The buffer is emptied whatever the outcome.
    #[instrument(level = "debug", skip(self), fields(cache_adapter = self.store.name()))]
    pub fn commit(&self) -> bool {
        let resolved = {
            let mut state = self.state.lock();
            if state.buffer.is_empty() {
                return true;
            }
            let pending = state.buffer.drain();
            let version = self.namespace_version(&mut state);
            let mut resolved = Vec::with_capacity(pending.len());
            for (key, write) in pending {
                match state.resolver.resolve(&key, &version) {
                    Ok(id) => resolved.push((key, id, write)),
                    Err(e) => warn!(
                        cache_adapter = self.store.name(),
                        key = %key,
                        error = %e,
                        "Dropping unresolvable key"
                    ),
                }
            }
            resolved
        };

        let now = self.clock.epoch_secs();
        let mut by_ttl: BTreeMap<u64, Vec<(String, Vec<u8>)>> = BTreeMap::new();
        let mut key_by_id = HashMap::with_capacity(resolved.len());
        let mut expired = Vec::new();

        for (key, id, write) in resolved {
            let expiry = write.expiry.resolve(now, self.default_lifetime);
            let ttl = match expiry {
                None => 0,
                Some(at) => match remaining_secs(at, now) {
                    Some(secs) => secs,
                    None => {
                        expired.push(id);
                        continue;
                    }
                },
            };
            let with_header = write.ctime_ms.is_some() || !write.tags.is_empty();
            let metadata = ItemMetadata {
                expiry: if with_header { expiry } else { None },
                ctime_ms: write.ctime_ms,
                tags: write.tags,
            };
            by_ttl
                .entry(ttl)
                .or_default()
                .push((id.clone(), envelope::encode(&metadata, &write.payload)));
            key_by_id.insert(id, key);
        }

        let mut ok = true;
        if !expired.is_empty() {
            if let Err(e) = self.store.delete_many(&expired) {
                warn!(
                    cache_adapter = self.store.name(),
                    ids = ?expired,
                    error = %e,
                    "Failed to delete expired items"
                );
                self.stats.record_error();
                ok = false;
            }
        }

        for (ttl, values) in by_ttl {
            let ttl = Duration::from_secs(ttl);
            let failed: HashSet<String> = match self.store.save_many(&values, ttl) {
                Ok(failed) => failed.into_iter().collect(),
                Err(e) => {
                    debug!(
                        cache_adapter = self.store.name(),
                        error = %e,
                        "Batch save failed, retrying one by one"
                    );
                    values.iter().map(|(id, _)| id.clone()).collect()
                }
            };
            self.stats.record_saves(values.len() - failed.len().min(values.len()));
            if failed.is_empty() {
                continue;
            }

            for entry in values.iter().filter(|(id, _)| failed.contains(id)) {
                let key = key_by_id.get(&entry.0).map_or(entry.0.as_str(), String::as_str);
                match self.store.save_many(std::slice::from_ref(entry), ttl) {
                    Ok(still_failed) if still_failed.is_empty() => {
                        self.stats.record_saves(1);
                        continue;
                    }
                    Ok(_) => warn!(cache_adapter = self.store.name(), key, "Failed to save key"),
                    Err(e) => warn!(
                        cache_adapter = self.store.name(),
                        key,
                        error = %e,
                        "Failed to save key"
                    ),
                }
                self.stats.record_save_failure();
                ok = false;
            }
        }
        ok
    }

    /// Invalidate entries whose key starts with `prefix`.
    ///
    /// With versioning the namespace version is rotated first, making every
    /// entry unreachable at once whatever `prefix` is; entries under the
    /// old version are then swept. Returns `true` if either the rotation
    /// or the sweep succeeded. Buffered writes are discarded.
    #[instrument(level = "debug", skip(self), fields(cache_adapter = self.store.name()))]
    pub fn clear(&self, prefix: &str) -> bool {
        let (to_clear, rotated) = {
            let mut state = self.state.lock();
            state.buffer.drain();
            if state.versioning {
                let current = self.namespace_version(&mut state);
                let namespace = state.resolver.namespace().to_string();
                let to_clear = format!("{namespace}{current}");
                let token = format_version(rand::random());
                let rotated = self.persist_version(&namespace, &token);
                if rotated {
                    debug!(
                        cache_adapter = self.store.name(),
                        version = %token,
                        "Rotated namespace version"
                    );
                    state.version = Some(token);
                    state.resolver.clear();
                }
                (to_clear, rotated)
            } else {
                (format!("{}{prefix}", state.resolver.namespace()), false)
            }
        };

        match self.store.clear(&to_clear) {
            Ok(cleared) => cleared || rotated,
            Err(e) => {
                warn!(
                    cache_adapter = self.store.name(),
                    prefix = %to_clear,
                    error = %e,
                    "Failed to clear the cache"
                );
                self.stats.record_error();
                rotated
            }
        }
    }

    /// Switch namespace versioning on or off, returning the previous
    /// setting. The memoized version token is forgotten either way.
    pub fn enable_versioning(&self, enable: bool) -> bool {
        let mut state = self.state.lock();
        let previous = state.versioning;
        if !enable && self.store.requires_versioning() {
            warn!(
                cache_adapter = self.store.name(),
                "Store requires namespace versioning, keeping it enabled"
            );
        }
        state.versioning = enable || self.store.requires_versioning();
        state.version = None;
        state.resolver.clear();
        previous
    }

    /// Discard buffered writes and forget the version token and id cache.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.buffer.drain();
        state.version = None;
        state.resolver.clear();
    }

    /// Ask the store to remove expired entries.
    pub fn prune(&self) -> bool {
        match self.store.prune() {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(cache_adapter = self.store.name(), error = %e, "Failed to prune the cache");
                self.stats.record_error();
                false
            }
        }
    }

    fn flush_if_pending<'a>(&self, keys: impl Iterator<Item = &'a str>) {
        let pending = self.state.lock().buffer.contains_any(keys);
        if pending {
            self.commit();
        }
    }

    /// Current version token, fetched or synthesized on first use. Empty
    /// when versioning is off or the store could not be reached.
    fn namespace_version(&self, state: &mut PoolState) -> String {
        if !state.versioning {
            return String::new();
        }
        if let Some(version) = &state.version {
            return version.clone();
        }

        let namespace = state.resolver.namespace().to_string();
        let key = version_key(&namespace);
        let stored = match self.store.fetch_many(std::slice::from_ref(&key)) {
            Ok(found) => found.into_iter().find(|(id, _)| *id == key).map(|(_, token)| token),
            Err(e) => {
                warn!(
                    cache_adapter = self.store.name(),
                    error = %e,
                    "Failed to fetch namespace version"
                );
                self.stats.record_error();
                return String::new();
            }
        };

        let version = match stored.map(String::from_utf8) {
            Some(Ok(token)) if !token.is_empty() => token,
            _ => {
                #[allow(clippy::cast_possible_truncation)]
                let token = format_version(self.clock.unix_secs() as u32);
                if !self.persist_version(&namespace, &token) {
                    return String::new();
                }
                token
            }
        };
        debug!(cache_adapter = self.store.name(), version = %version, "Loaded namespace version");
        state.resolver.clear();
        state.version = Some(version.clone());
        version
    }

    fn persist_version(&self, namespace: &str, token: &str) -> bool {
        let entry = (version_key(namespace), token.as_bytes().to_vec());
        match self.store.save_many(std::slice::from_ref(&entry), Duration::ZERO) {
            Ok(failed) if failed.is_empty() => true,
            Ok(_) => {
                warn!(cache_adapter = self.store.name(), "Failed to save namespace version");
                self.stats.record_error();
                false
            }
            Err(e) => {
                warn!(
                    cache_adapter = self.store.name(),
                    error = %e,
                    "Failed to save namespace version"
                );
                self.stats.record_error();
                false
            }
        }
    }

    fn decode(&self, key: &str, payload: &[u8]) -> Option<(V, ItemMetadata)> {
        let decoded = envelope::decode(payload)
            .map_err(CacheError::from)
            .and_then(|(metadata, value)| self.marshaller.unmarshall(value).map(|v| (v, metadata)));
        match decoded {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(
                    cache_adapter = self.store.name(),
                    key,
                    error = %e,
                    "Failed to unserialize key"
                );
                self.stats.record_error();
                None
            }
        }
    }

    fn build_item(&self, key: String, payload: Option<&[u8]>) -> CacheItem<V> {
        match payload.and_then(|p| self.decode(&key, p)) {
            Some((value, metadata)) => {
                self.stats.record_hit();
                CacheItem::hit(key, value, metadata)
            }
            None => {
                self.stats.record_miss();
                CacheItem::miss(key)
            }
        }
    }
}

impl<V> Drop for CachePool<V> {
    fn drop(&mut self) {
        if !self.state.get_mut().buffer.is_empty() {
            self.commit();
        }
    }
}

impl<V> std::fmt::Debug for CachePool<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePool")
            .field("store", &self.store.name())
            .field("default_lifetime", &self.default_lifetime)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Items produced by [`CachePool::get_items`]. Values are decoded lazily.
pub struct Items<'a, V> {
    pool: &'a CachePool<V>,
    hits: std::vec::IntoIter<(String, Vec<u8>)>,
    misses: std::vec::IntoIter<String>,
}

impl<V> Iterator for Items<'_, V> {
    type Item = (String, CacheItem<V>);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((key, payload)) = self.hits.next() {
            let item = self.pool.build_item(key.clone(), Some(&payload));
            return Some((key, item));
        }
        let key = self.misses.next()?;
        self.pool.stats.record_miss();
        Some((key.clone(), CacheItem::miss(key)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.hits.len() + self.misses.len();
        (len, Some(len))
    }
}

impl<V> ExactSizeIterator for Items<'_, V> {}

/// Whole seconds left before `expiry`, or `None` when it has passed.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn remaining_secs(expiry: f64, now: f64) -> Option<u64> {
    let secs = (expiry - now + 0.1).floor();
    (secs >= 1.0).then(|| secs.min(u64::MAX as f64) as u64)
}

#[cfg(test)]
mod tests;

//! Compute-and-cache.
//!
//! [`CachePool::get`] returns the cached value for a key or computes,
//! saves and returns it. Concurrent callers for the same key inside one
//! process are funnelled through a [`LockRegistry`] so only one of them
//! runs the computation; the others wait and read its result. Hits close
//! to their expiry may be refreshed early (see [`should_recompute_early`]).

mod early_expiration;
mod lock_registry;

use cachette_domain::constants::DEFAULT_BETA;
use cachette_domain::{CacheError, CacheItem, Expiry};
use tracing::debug;

pub use self::early_expiration::{sample, should_recompute_early};
pub use self::lock_registry::{ComputingGuard, LockRegistry, Nesting, DEFAULT_SLOTS};
use crate::pool::CachePool;

impl<V> CachePool<V> {
    /// Fetch `key`, computing and caching it on a miss.
    ///
    /// `recompute` receives the item (a miss, or the hit being refreshed
    /// early) and a `save` flag; clearing the flag returns the value
    /// without caching it. `beta` weights early expiration: `None` means
    /// 1.0, `Some(0.0)` disables it and `Some(f64::INFINITY)` always
    /// recomputes.
    ///
    /// Calls made from inside `recompute` on the same thread skip the
    /// single-flight lock. Locks are taken per namespace and key, so pools
    /// sharing a [`LockRegistry`] only wait on each other for the same
    /// namespaced key. Errors from `recompute` are returned unchanged.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidArgument`] for a negative or NaN `beta`,
    /// [`CacheError::InvalidKey`] for an invalid key,
    /// [`CacheError::Serialization`] when the computed value cannot be
    /// encoded, and whatever `recompute` returns.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let profile = pool.get("user.42", |item, _save| {
    ///     item.expires_after(Some(Duration::from_secs(300)), &SystemClock);
    ///     load_profile(42)
    /// }, None)?;
    /// ```
    pub fn get<E, F>(&self, key: &str, recompute: F, beta: Option<f64>) -> Result<V, E>
    where
        E: From<CacheError>,
        F: FnOnce(&mut CacheItem<V>, &mut bool) -> Result<V, E>,
    {
        let beta = beta.unwrap_or(DEFAULT_BETA);
        if beta.is_nan() || beta < 0.0 {
            return Err(CacheError::InvalidArgument(format!(
                "beta must be a non-negative number, got {beta}"
            ))
            .into());
        }

        let mut item = self.get_item(key)?;
        if item.is_hit() && !self.recompute_early(&item, beta) {
            if let Some(value) = item.take_value() {
                return Ok(value);
            }
        }

        // Registries may be shared, so locks and markers are per namespace.
        let scope = format!("{}{key}", self.namespace());
        match self.locks.nesting(&scope) {
            Nesting::SameKey => {
                let mut save = false;
                return recompute(&mut item, &mut save);
            }
            Nesting::OtherKey => return self.compute_and_save(&scope, item, recompute),
            Nesting::Outermost => {}
        }

        let was_hit = item.is_hit();
        loop {
            if let Some(_lock) = self.locks.try_lock(&scope) {
                if !was_hit {
                    let mut fresh = self.get_item(key)?;
                    if fresh.is_hit() {
                        if let Some(value) = fresh.take_value() {
                            debug!(
                                cache_adapter = self.store.name(),
                                key,
                                "Item computed by another caller"
                            );
                            return Ok(value);
                        }
                    }
                }
                debug!(cache_adapter = self.store.name(), key, "Lock acquired, now computing item");
                return self.compute_and_save(&scope, item, recompute);
            }

            debug!(
                cache_adapter = self.store.name(),
                key,
                "Item is locked, waiting for it to be released"
            );
            self.locks.wait(&scope);

            let mut fresh = self.get_item(key)?;
            if fresh.is_hit() {
                if let Some(value) = fresh.take_value() {
                    debug!(
                        cache_adapter = self.store.name(),
                        key,
                        "Item retrieved after lock was released"
                    );
                    return Ok(value);
                }
            }
            debug!(
                cache_adapter = self.store.name(),
                key,
                "Item not found while lock was released, now retrying"
            );
            item = fresh;
        }
    }

    fn recompute_early(&self, item: &CacheItem<V>, beta: f64) -> bool {
        let now = self.clock.epoch_secs();
        should_recompute_early(item.metadata(), beta, now, sample(&mut rand::thread_rng()))
    }

    /// Run `recompute` with the computation marker set, then save the
    /// result with its computation time when it will still be live.
    fn compute_and_save<E, F>(
        &self,
        scope: &str,
        mut item: CacheItem<V>,
        recompute: F,
    ) -> Result<V, E>
    where
        E: From<CacheError>,
        F: FnOnce(&mut CacheItem<V>, &mut bool) -> Result<V, E>,
    {
        let _computing = self.locks.enter(scope);
        if let Some(expiry) = item.metadata().expiry {
            item.set_expiry(Expiry::At(expiry));
        }

        let started = self.clock.now();
        let mut save = true;
        let value = recompute(&mut item, &mut save)?;
        if !save {
            return Ok(value);
        }

        let ended = self.clock.epoch_secs();
        let elapsed = self.clock.now().saturating_duration_since(started);
        let elapsed_ms = (elapsed.as_secs_f64() * 1000.0).ceil();
        let ctime_ms = match item.expiry().resolve(ended, self.default_lifetime) {
            Some(expiry) if expiry > ended => Some(clamp_ms(elapsed_ms)),
            _ => None,
        };
        item.set_ctime_ms(ctime_ms);

        self.defer(&item, &value)?;
        self.commit();
        Ok(value)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_ms(ms: f64) -> u32 {
    ms.clamp(1.0, f64::from(u32::MAX)) as u32
}

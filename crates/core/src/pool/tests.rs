//! Unit tests for pool.
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cachette_common::MockClock;
use cachette_domain::{CacheError, CacheItem, PoolConfig};

use super::*;
use crate::marshal::JsonMarshaller;
use crate::testing::{namespaced, pool_over, FakeStore};

fn store() -> Arc<FakeStore> {
    Arc::new(FakeStore::new(MockClock::new()))
}

fn save_value(pool: &CachePool<String>, key: &str, value: &str) -> bool {
    let mut item = pool.get_item(key).unwrap();
    item.set(value.to_string());
    pool.save(&item).unwrap()
}

fn value_of(pool: &CachePool<String>, key: &str) -> Option<String> {
    pool.get_item(key).unwrap().into_value()
}

/// Validates `CachePool::get_item` and `CachePool::save` for the basic
/// miss-then-hit scenario.
///
/// Assertions:
/// - Ensures a cold key is a miss.
/// - Confirms a saved value comes back as a hit under the namespaced id.
/// - Confirms hit and miss counters.
#[test]
fn test_miss_then_hit() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));

    assert!(!pool.get_item("user.1").unwrap().is_hit());
    assert!(save_value(&pool, "user.1", "ada"));
    assert!(store.contains("app:user.1"));

    let item = pool.get_item("user.1").unwrap();
    assert!(item.is_hit());
    assert_eq!(item.get().map(String::as_str), Some("ada"));

    let stats = pool.stats();
    assert_eq!((stats.hits, stats.misses, stats.saves), (1, 2, 1));
}

/// Validates namespacing isolation between pools sharing one store.
///
/// Assertions:
/// - Ensures a key saved in namespace `a` is a miss in namespace `b`.
#[test]
fn test_namespaces_are_isolated() {
    let store = store();
    let a = pool_over(&store, &namespaced("a"));
    let b = pool_over(&store, &namespaced("b"));

    assert!(save_value(&a, "k", "from-a"));
    assert_eq!(value_of(&a, "k").as_deref(), Some("from-a"));
    assert!(!b.get_item("k").unwrap().is_hit());
    assert!(!b.has_item("k").unwrap());
}

/// Validates the deferred-buffer read consistency scenario.
///
/// Assertions:
/// - Confirms a deferred write is visible to the next read without an
///   explicit commit.
/// - Ensures the read flushed the whole buffer.
#[test]
fn test_read_flushes_deferred_writes() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));

    let mut first = CacheItem::miss("first");
    first.set("1".to_string());
    let mut second = CacheItem::miss("second");
    second.set("2".to_string());
    assert!(pool.save_deferred(&first).unwrap());
    assert!(pool.save_deferred(&second).unwrap());
    assert_eq!(pool.deferred_len(), 2);
    assert!(store.ids().is_empty());

    assert_eq!(value_of(&pool, "first").as_deref(), Some("1"));
    assert_eq!(pool.deferred_len(), 0);
    assert!(store.contains("app:second"));
}

/// Validates `CachePool::has_item` for the buffered key scenario.
///
/// Assertions:
/// - Confirms `has_item` sees a value that was only buffered.
#[test]
fn test_has_item_flushes_buffer() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    let mut item = CacheItem::miss("k");
    item.set("v".to_string());
    pool.save_deferred(&item).unwrap();
    assert!(pool.has_item("k").unwrap());
}

/// Validates the TTL boundary scenario with a mock clock.
///
/// Assertions:
/// - Ensures an item with a one second TTL is a hit right after saving.
/// - Ensures it is a miss once the TTL has elapsed.
#[test]
fn test_ttl_boundary() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));

    let mut item = pool.get_item("session").unwrap();
    item.set("token".to_string()).expires_after(Some(Duration::from_secs(1)), &store.clock);
    assert!(pool.save(&item).unwrap());
    assert!(pool.get_item("session").unwrap().is_hit());

    store.clock.advance(Duration::from_millis(1_001));
    assert!(!pool.get_item("session").unwrap().is_hit());
}

/// Validates the default lifetime applied by `commit`.
///
/// Assertions:
/// - Confirms items without an explicit expiry use the pool default TTL.
/// - Confirms items marked `Never` are saved with a zero TTL.
#[test]
fn test_default_lifetime_and_never() {
    let store = store();
    let config = PoolConfig::builder()
        .namespace("app")
        .default_lifetime(Duration::from_secs(60))
        .build()
        .unwrap();
    let pool = pool_over(&store, &config);

    let mut defaulted = CacheItem::miss("a");
    defaulted.set("1".to_string());
    let mut forever = CacheItem::miss("b");
    forever.set("2".to_string()).set_expiry(cachette_domain::Expiry::Never);
    pool.save_deferred(&defaulted).unwrap();
    pool.save_deferred(&forever).unwrap();
    assert!(pool.commit());

    let mut calls = store.save_calls.lock().clone();
    calls.sort();
    assert_eq!(calls, vec![(1, Duration::ZERO), (1, Duration::from_secs(60))]);

    store.clock.advance(Duration::from_secs(61));
    assert!(!pool.get_item("a").unwrap().is_hit());
    assert!(pool.get_item("b").unwrap().is_hit());
}

/// Validates `CachePool::commit` grouping by TTL and deleting expired
/// items.
///
/// Assertions:
/// - Confirms items sharing a TTL are saved in one call.
/// - Ensures an already-expired item is deleted rather than saved.
#[test]
fn test_commit_groups_by_ttl_and_deletes_expired() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    save_value(&pool, "stale", "old");
    store.save_calls.lock().clear();

    for key in ["x", "y"] {
        let mut item = CacheItem::miss(key);
        item.set(key.to_string()).expires_after(Some(Duration::from_secs(30)), &store.clock);
        pool.save_deferred(&item).unwrap();
    }
    let mut stale = CacheItem::miss("stale");
    stale.set("new".to_string()).expires_after(Some(Duration::ZERO), &store.clock);
    pool.save_deferred(&stale).unwrap();

    assert!(pool.commit());
    assert_eq!(*store.save_calls.lock(), vec![(2, Duration::from_secs(30))]);
    assert!(!store.contains("app:stale"));
}

/// Validates `CachePool::commit` per-id retry after a failed batch.
///
/// Assertions:
/// - Ensures ids that succeed individually are saved.
/// - Ensures the commit reports failure for the id that still fails.
/// - Confirms the buffer is empty afterwards.
#[test]
fn test_commit_retries_each_id_after_batch_failure() {
    let store = store();
    store.fail_batch_save.store(true, Ordering::SeqCst);
    store.unsavable.lock().insert("app:b".to_string());
    let pool = pool_over(&store, &namespaced("app"));

    for key in ["a", "b", "c"] {
        let mut item = CacheItem::miss(key);
        item.set(key.to_string());
        pool.save_deferred(&item).unwrap();
    }
    assert!(!pool.commit());
    assert!(store.contains("app:a"));
    assert!(!store.contains("app:b"));
    assert!(store.contains("app:c"));
    assert_eq!(pool.deferred_len(), 0);

    let stats = pool.stats();
    assert_eq!((stats.saves, stats.save_failures), (2, 1));
}

/// Validates the bulk delete partial-failure resilience scenario.
///
/// Assertions:
/// - Ensures `delete_items` reports failure overall.
/// - Confirms `a` and `c` are gone while `b` is still present.
#[test]
fn test_bulk_delete_falls_back_to_single_deletes() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    for key in ["a", "b", "c"] {
        save_value(&pool, key, key);
    }
    store.fail_bulk_delete.store(true, Ordering::SeqCst);
    store.undeletable.lock().insert("app:b".to_string());

    assert!(!pool.delete_items(["a", "b", "c"]).unwrap());
    assert!(!pool.has_item("a").unwrap());
    assert!(pool.has_item("b").unwrap());
    assert!(!pool.has_item("c").unwrap());
}

/// Validates `CachePool::delete_item` for absent keys and buffered keys.
///
/// Assertions:
/// - Confirms deleting an absent key succeeds.
/// - Ensures a buffered write is dropped by a delete.
#[test]
fn test_delete_absent_and_buffered() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    assert!(pool.delete_item("missing").unwrap());

    let mut item = CacheItem::miss("pending");
    item.set("v".to_string());
    pool.save_deferred(&item).unwrap();
    assert!(pool.delete_item("pending").unwrap());
    assert!(pool.commit());
    assert!(!store.contains("app:pending"));
}

/// Validates `CachePool::get_items` ordering and de-duplication.
///
/// Assertions:
/// - Confirms hits come first, then misses in input order.
/// - Ensures a duplicated key is yielded once.
#[test]
fn test_get_items_order_and_dedup() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    save_value(&pool, "b", "2");
    save_value(&pool, "d", "4");

    let items: Vec<(String, bool)> = pool
        .get_items(["a", "b", "c", "b", "d"])
        .unwrap()
        .map(|(k, item)| (k, item.is_hit()))
        .collect();
    assert_eq!(
        items,
        vec![("b".into(), true), ("d".into(), true), ("a".into(), false), ("c".into(), false)]
    );
    assert_eq!(store.fetch_calls.load(Ordering::SeqCst), 3);
}

/// Validates `CachePool::get_items` for the invalid key scenario.
///
/// Assertions:
/// - Ensures one invalid key fails the whole call before any fetch.
#[test]
fn test_get_items_rejects_invalid_key() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    assert!(matches!(pool.get_items(["ok", "bad{key}"]), Err(CacheError::InvalidKey { .. })));
    assert_eq!(store.fetch_calls.load(Ordering::SeqCst), 0);
}

/// Validates degraded reads when the backend fails.
///
/// Assertions:
/// - Ensures a failing fetch is a miss, not an error.
/// - Ensures a failing `has` reports `false`.
/// - Confirms swallowed errors are counted.
#[test]
fn test_backend_failures_degrade() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    save_value(&pool, "k", "v");

    store.fail_fetch.store(true, Ordering::SeqCst);
    store.fail_has.store(true, Ordering::SeqCst);
    assert!(!pool.get_item("k").unwrap().is_hit());
    assert_eq!(pool.get_items(["k"]).unwrap().filter(|(_, item)| item.is_hit()).count(), 0);
    assert!(!pool.has_item("k").unwrap());
    assert_eq!(pool.stats().errors, 3);
}

/// Validates corrupt entries are read as misses.
///
/// Assertions:
/// - Ensures an unknown marker byte and a bad JSON body are both misses.
#[test]
fn test_corrupt_entries_are_misses() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    store.put_raw("app:marker", vec![0x42, b'1']);
    store.put_raw("app:body", vec![envelope::BARE, b'{']);

    assert!(!pool.get_item("marker").unwrap().is_hit());
    assert!(!pool.get_item("body").unwrap().is_hit());
    assert_eq!(pool.stats().errors, 2);
}

/// Validates programming errors are surfaced.
///
/// Assertions:
/// - Ensures reserved characters fail every keyed operation.
/// - Ensures saving an item without a value is an invalid argument.
/// - Ensures an unencodable value fails `save_deferred`.
#[test]
fn test_programming_errors_surface() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    assert!(matches!(pool.get_item("a:b"), Err(CacheError::InvalidKey { .. })));
    assert!(matches!(pool.has_item(""), Err(CacheError::InvalidKey { .. })));
    assert!(matches!(pool.delete_item("a@b"), Err(CacheError::InvalidKey { .. })));
    assert!(matches!(pool.save(&CacheItem::miss("empty")), Err(CacheError::InvalidArgument(_))));

    let store_port: Arc<dyn Store> = store.clone();
    let maps: CachePool<BTreeMap<(u8, u8), u8>> =
        CachePool::new(store_port, Arc::new(JsonMarshaller), &namespaced("maps")).unwrap();
    let mut item = CacheItem::miss("m");
    item.set(BTreeMap::from([((1, 2), 3)]));
    assert!(matches!(maps.save_deferred(&item), Err(CacheError::Serialization(_))));
    assert_eq!(maps.deferred_len(), 0);
}

/// Validates `CachePool::save` for values the marshaller cannot reproduce.
///
/// Assertions:
/// - Ensures saving NaN fails with `Serialization` instead of reporting
///   a write that never reads back as a hit.
/// - Ensures `Some(None)` is refused the same way.
/// - Confirms nothing reaches the store and a finite value still saves.
#[test]
fn test_values_that_cannot_round_trip_are_refused() {
    let store = store();
    let store_port: Arc<dyn Store> = store.clone();
    let floats: CachePool<f64> =
        CachePool::new(Arc::clone(&store_port), Arc::new(JsonMarshaller), &namespaced("floats"))
            .unwrap();
    let mut item = floats.get_item("ratio").unwrap();
    item.set(f64::NAN);
    assert!(matches!(floats.save(&item), Err(CacheError::Serialization(_))));
    assert!(!floats.has_item("ratio").unwrap());

    let options: CachePool<Option<Option<u32>>> =
        CachePool::new(store_port, Arc::new(JsonMarshaller), &namespaced("options")).unwrap();
    let mut nested = options.get_item("inner").unwrap();
    nested.set(Some(None));
    assert!(matches!(options.save(&nested), Err(CacheError::Serialization(_))));
    assert!(store.ids().is_empty());

    item.set(0.25);
    assert!(floats.save(&item).unwrap());
    assert_eq!(floats.get_item("ratio").unwrap().into_value(), Some(0.25));
}

/// Validates `CachePool::new` namespace validation.
///
/// Assertions:
/// - Ensures a namespace with a reserved character is rejected.
#[test]
fn test_invalid_namespace_rejected() {
    let store_port: Arc<dyn Store> = store();
    let config = PoolConfig { namespace: "a b".into(), ..PoolConfig::default() };
    let result: CacheResult<CachePool<String>> =
        CachePool::new(store_port, Arc::new(JsonMarshaller), &config);
    assert!(matches!(result, Err(CacheError::InvalidNamespace { character: ' ', .. })));
}

/// Validates `CachePool::new` for a namespace that cannot fit a hashed id.
///
/// Assertions:
/// - Ensures a namespace past the store's identifier budget is rejected.
/// - Confirms the longest accepted namespace keeps every hashed id,
///   versioned or not, within the limit.
#[test]
fn test_namespace_must_leave_room_for_hashed_ids() {
    let limited = || Arc::new(FakeStore { max_id_length: Some(64), ..FakeStore::default() });

    let too_long: Arc<dyn Store> = limited();
    let config = PoolConfig { namespace: "n".repeat(60), ..PoolConfig::default() };
    let result: CacheResult<CachePool<String>> =
        CachePool::new(too_long, Arc::new(JsonMarshaller), &config);
    assert!(matches!(result, Err(CacheError::InvalidArgument(_))));

    let store = limited();
    let pool = pool_over(&store, &namespaced(&"n".repeat(64 - 24)));
    let long_key = "k".repeat(100);
    let plain = pool.resolve_id(&long_key).unwrap();
    assert!(plain.len() <= 64, "id of {} characters", plain.len());

    assert!(!pool.enable_versioning(true));
    let versioned = pool.resolve_id(&long_key).unwrap();
    assert_ne!(plain, versioned);
    assert!(versioned.len() <= 64, "id of {} characters", versioned.len());
}

/// Validates the versioned clear idempotence scenario.
///
/// Assertions:
/// - Ensures every key is a miss after the first and second clear.
/// - Confirms each clear stores a new version token.
/// - Confirms keys saved after a clear are readable again.
#[test]
fn test_versioned_clear() {
    let store = store();
    let config = PoolConfig::builder().namespace("app").versioning(true).build().unwrap();
    let pool = pool_over(&store, &config);

    save_value(&pool, "k1", "v1");
    save_value(&pool, "k2", "v2");
    let first_id = pool.resolve_id("k1").unwrap();
    let version_before = store.entries.lock()[":app:"].0.clone();

    assert!(pool.clear(""));
    assert!(!pool.get_item("k1").unwrap().is_hit());
    assert!(!pool.get_item("k2").unwrap().is_hit());
    let version_after = store.entries.lock()[":app:"].0.clone();
    assert_ne!(version_before, version_after);
    assert_ne!(pool.resolve_id("k1").unwrap(), first_id);

    assert!(pool.clear(""));
    assert!(!pool.get_item("k1").unwrap().is_hit());

    save_value(&pool, "k1", "fresh");
    assert_eq!(value_of(&pool, "k1").as_deref(), Some("fresh"));
}

/// Validates the version token is shared by pools on the same namespace.
///
/// Assertions:
/// - Confirms a clear through one pool hides entries from a pool created
///   afterwards.
#[test]
fn test_version_token_shared_across_pools() {
    let store = store();
    let config = PoolConfig::builder().namespace("app").versioning(true).build().unwrap();
    let writer = pool_over(&store, &config);
    save_value(&writer, "k", "v");

    let reader = pool_over(&store, &config);
    assert_eq!(value_of(&reader, "k").as_deref(), Some("v"));

    writer.clear("");
    let late_reader = pool_over(&store, &config);
    assert!(!late_reader.get_item("k").unwrap().is_hit());
}

/// Validates the unversioned prefix clear.
///
/// Assertions:
/// - Ensures only keys under the prefix are removed.
/// - Ensures other namespaces are untouched.
#[test]
fn test_prefix_clear_without_versioning() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    let other = pool_over(&store, &namespaced("other"));
    save_value(&pool, "user.1", "a");
    save_value(&pool, "post.1", "b");
    save_value(&other, "user.1", "c");

    assert!(pool.clear("user."));
    assert!(!pool.has_item("user.1").unwrap());
    assert!(pool.has_item("post.1").unwrap());
    assert!(other.has_item("user.1").unwrap());

    assert!(pool.clear(""));
    assert!(!pool.has_item("post.1").unwrap());
    assert!(other.has_item("user.1").unwrap());
}

/// Validates version fetch failures fall back to unversioned ids.
///
/// Assertions:
/// - Ensures a failing version fetch yields an id without a token.
/// - Confirms the token is fetched once the backend recovers.
#[test]
fn test_version_fetch_failure_is_not_memoized() {
    let store = store();
    let config = PoolConfig::builder().namespace("app").versioning(true).build().unwrap();
    let pool = pool_over(&store, &config);

    store.fail_fetch.store(true, Ordering::SeqCst);
    assert_eq!(pool.resolve_id("k").unwrap(), "app:k");

    store.fail_fetch.store(false, Ordering::SeqCst);
    let id = pool.resolve_id("k").unwrap();
    assert_eq!(id.len(), "app:".len() + version::TOKEN_LEN + 1);
    assert!(store.contains(":app:"));
}

/// Validates `CachePool::enable_versioning` and stores that require it.
///
/// Assertions:
/// - Confirms the previous setting is returned.
/// - Ensures a store requiring versioning keeps it enabled.
#[test]
fn test_enable_versioning() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    assert!(!pool.enable_versioning(true));
    assert!(pool.enable_versioning(false));
    assert_eq!(pool.resolve_id("k").unwrap(), "app:k");

    let forcing =
        Arc::new(FakeStore { requires_versioning: true, ..FakeStore::new(MockClock::new()) });
    let forced = pool_over(&forcing, &namespaced("app"));
    assert!(forced.enable_versioning(false));
    assert_ne!(forced.resolve_id("k").unwrap(), "app:k");
}

/// Validates `CachePool::reset` and teardown behavior.
///
/// Assertions:
/// - Ensures `reset` discards buffered writes.
/// - Ensures dropping a pool commits its buffer.
#[test]
fn test_reset_discards_and_drop_commits() {
    let store = store();
    {
        let pool = pool_over(&store, &namespaced("app"));
        let mut item = CacheItem::miss("discarded");
        item.set("x".to_string());
        pool.save_deferred(&item).unwrap();
        pool.reset();

        let mut kept = CacheItem::miss("kept");
        kept.set("y".to_string());
        pool.save_deferred(&kept).unwrap();
    }
    assert_eq!(store.ids(), vec!["app:kept".to_string()]);
}

/// Validates long keys are hashed under a store identifier limit.
///
/// Assertions:
/// - Ensures the effective id fits the store limit.
/// - Confirms the value is still readable through the long key.
#[test]
fn test_long_key_hashing_through_pool() {
    let store = Arc::new(FakeStore { max_id_length: Some(40), ..FakeStore::new(MockClock::new()) });
    let pool = pool_over(&store, &namespaced("app"));
    let key = "long".repeat(30);

    save_value(&pool, &key, "v");
    let ids = store.ids();
    assert_eq!(ids.len(), 1);
    assert!(ids[0].len() <= 40);
    assert_eq!(value_of(&pool, &key).as_deref(), Some("v"));
}

/// Validates tags and ctime travel through the metadata envelope.
///
/// Assertions:
/// - Confirms tags and computation time are exposed on the next hit.
/// - Confirms the recorded expiry matches the TTL.
#[test]
fn test_metadata_round_trip() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));

    let mut item = CacheItem::miss("tagged");
    item.set("v".to_string())
        .expires_after(Some(Duration::from_secs(10)), &store.clock)
        .set_ctime_ms(Some(25));
    item.tag("users").unwrap();
    pool.save(&item).unwrap();

    let hit = pool.get_item("tagged").unwrap();
    let metadata = hit.metadata();
    assert!(metadata.tags.contains("users"));
    assert_eq!(metadata.ctime_ms, Some(25));
    assert_eq!(metadata.expiry, Some(store.clock.epoch_secs() + 10.0));
}

/// Validates `CachePool::prune` delegation.
///
/// Assertions:
/// - Ensures expired entries are physically removed by `prune`.
#[test]
fn test_prune_delegates_to_store() {
    let store = store();
    let pool = pool_over(&store, &namespaced("app"));
    let mut item = CacheItem::miss("short");
    item.set("v".to_string()).expires_after(Some(Duration::from_secs(2)), &store.clock);
    pool.save(&item).unwrap();

    store.clock.advance(Duration::from_secs(3));
    assert!(store.contains("app:short"));
    assert!(pool.prune());
    assert!(!store.contains("app:short"));
}

/// Validates `remaining_secs` rounding.
///
/// Assertions:
/// - Confirms a fraction just under a whole second rounds up.
/// - Ensures a passed expiry yields `None`.
#[test]
fn test_remaining_secs() {
    assert_eq!(remaining_secs(101.0, 100.0), Some(1));
    assert_eq!(remaining_secs(101.95, 100.0), Some(2));
    assert_eq!(remaining_secs(100.5, 100.0), None);
    assert_eq!(remaining_secs(99.0, 100.0), None);
}
